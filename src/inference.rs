//! Inference Session Manager: turns model bytes into runnable sessions,
//! trying compute backends fastest-first.

use crate::assets::ModelAsset;
use anyhow::{anyhow, Result};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, DirectMLExecutionProvider,
    ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute backend a session can run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[value(name = "tensorrt")]
    TensorRt,
    Cuda,
    #[value(name = "directml")]
    DirectMl,
    #[value(name = "coreml")]
    CoreMl,
    Cpu,
}

impl Backend {
    /// Every backend, fastest first
    pub const ALL: [Backend; 5] = [
        Backend::TensorRt,
        Backend::Cuda,
        Backend::DirectMl,
        Backend::CoreMl,
        Backend::Cpu,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::TensorRt => "tensorrt",
            Backend::Cuda => "cuda",
            Backend::DirectMl => "directml",
            Backend::CoreMl => "coreml",
            Backend::Cpu => "cpu",
        }
    }

    pub fn default_order() -> Vec<Backend> {
        vec![Backend::TensorRt, Backend::Cuda, Backend::Cpu]
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds a session for one model on one specific backend
pub trait SessionFactory {
    type Session;

    /// Fail (rather than silently degrade) if `backend` cannot host the model
    fn create(&self, model: &ModelAsset, backend: Backend) -> Result<Self::Session>;
}

/// Creates sessions by walking an ordered backend list
pub struct SessionManager<F> {
    factory: F,
    backends: Vec<Backend>,
}

impl<F: SessionFactory> SessionManager<F> {
    pub fn new(factory: F, backends: Vec<Backend>) -> Self {
        Self { factory, backends }
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// First backend that accepts the model wins; `None` if all refuse
    pub fn create_session(&self, model: &ModelAsset) -> Option<(F::Session, Backend)> {
        for &backend in &self.backends {
            let _span = tracing::debug_span!("create_session", model = %model.name, %backend).entered();
            match self.factory.create(model, backend) {
                Ok(session) => {
                    tracing::info!("Session for {} created on {}", model.name, backend);
                    return Some((session, backend));
                }
                Err(e) => {
                    tracing::warn!("Backend {} unavailable for {}: {:#}", backend, model.name, e);
                }
            }
        }

        tracing::error!("No backend could create a session for {}", model.name);
        None
    }
}

/// ONNX Runtime sessions built from in-memory model bytes
#[derive(Debug, Clone)]
pub struct OrtSessionFactory {
    intra_threads: usize,
}

impl OrtSessionFactory {
    pub fn new(intra_threads: usize) -> Self {
        Self {
            intra_threads: intra_threads.max(1),
        }
    }

    fn provider(backend: Backend) -> Option<ExecutionProviderDispatch> {
        let provider = match backend {
            Backend::TensorRt => TensorRTExecutionProvider::default().build(),
            Backend::Cuda => CUDAExecutionProvider::default().build(),
            Backend::DirectMl => DirectMLExecutionProvider::default().build(),
            Backend::CoreMl => CoreMLExecutionProvider::default().build(),
            Backend::Cpu => return None,
        };
        Some(provider.error_on_failure())
    }
}

impl Default for OrtSessionFactory {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SessionFactory for OrtSessionFactory {
    type Session = Session;

    fn create(&self, model: &ModelAsset, backend: Backend) -> Result<Session> {
        let mut builder = Session::builder()
            .map_err(|e| anyhow!("ORT session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("ORT opt level: {e}"))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| anyhow!("ORT intra threads: {e}"))?;

        if let Some(provider) = Self::provider(backend) {
            builder = builder
                .with_execution_providers([provider])
                .map_err(|e| anyhow!("ORT {backend} provider: {e}"))?;
        }

        builder
            .commit_from_memory(&model.bytes)
            .map_err(|e| anyhow!("ORT load {}: {e}", model.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Accepts only the listed backends and records every attempt
    struct PickyFactory {
        accepts: Vec<Backend>,
        attempts: RefCell<Vec<Backend>>,
    }

    impl SessionFactory for PickyFactory {
        type Session = Backend;

        fn create(&self, _model: &ModelAsset, backend: Backend) -> Result<Backend> {
            self.attempts.borrow_mut().push(backend);
            if self.accepts.contains(&backend) {
                Ok(backend)
            } else {
                Err(anyhow!("{backend} refused"))
            }
        }
    }

    fn asset() -> ModelAsset {
        ModelAsset {
            name: "encoder.onnx".into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_falls_through_to_first_working_backend() {
        let factory = PickyFactory {
            accepts: vec![Backend::Cpu, Backend::Cuda],
            attempts: RefCell::new(Vec::new()),
        };
        let manager = SessionManager::new(factory, vec![Backend::TensorRt, Backend::Cuda, Backend::Cpu]);

        let (session, backend) = manager.create_session(&asset()).unwrap();
        assert_eq!(backend, Backend::Cuda);
        assert_eq!(session, Backend::Cuda);
        assert_eq!(
            *manager.factory.attempts.borrow(),
            vec![Backend::TensorRt, Backend::Cuda]
        );
    }

    #[test]
    fn test_all_backends_fail() {
        let factory = PickyFactory {
            accepts: vec![],
            attempts: RefCell::new(Vec::new()),
        };
        let manager = SessionManager::new(factory, Backend::default_order());

        assert!(manager.create_session(&asset()).is_none());
        assert_eq!(manager.factory.attempts.borrow().len(), 3);
    }

    #[test]
    fn test_backend_names_round_trip_through_serde() {
        for backend in Backend::ALL {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend.name()));
            let parsed: Backend = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, backend);
        }
    }
}
