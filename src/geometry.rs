use serde::{Deserialize, Serialize};

/// A position in canvas (content) space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Linear interpolation, `t = 0` is `self` and `t = 1` is `other`
    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    pub fn midpoint(self, other: Point) -> Point {
        self.lerp(other, 0.5)
    }
}

impl std::str::FromStr for Point {
    type Err = String;

    /// Parses `"x,y"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected x,y but got '{s}'"))?;
        let x = x.trim().parse().map_err(|e| format!("bad x in '{s}': {e}"))?;
        let y = y.trim().parse().map_err(|e| format!("bad y in '{s}': {e}"))?;
        Ok(Point { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints() {
        let a = Point::new(0.0, 10.0);
        let b = Point::new(10.0, 0.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.midpoint(b), Point::new(5.0, 5.0));
    }

    #[test]
    fn test_parse_point() {
        let p: Point = "3.5, -2".parse().unwrap();
        assert_eq!(p, Point::new(3.5, -2.0));
        assert!("3.5".parse::<Point>().is_err());
    }
}
