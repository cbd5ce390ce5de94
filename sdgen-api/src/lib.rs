pub use errors::Error;

use std::ops::Deref;
use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod gen;
pub mod paths;
pub mod routes;
pub mod server;

pub type Result<T> = core::result::Result<T, errors::Error>;

pub struct InnerAppState {
    pub config: config::Config,
    /// `None` when running in mock mode.
    pub pipelines: Option<gen::PipelineSet>,
    pub seeder: gen::Seeder,
}

impl InnerAppState {
    pub fn new(config: config::Config, pipelines: Option<gen::PipelineSet>) -> Self {
        Self {
            config,
            pipelines,
            seeder: gen::Seeder::default(),
        }
    }
}

#[derive(Clone)]
pub struct SharedAppState(Arc<InnerAppState>);

impl Deref for SharedAppState {
    type Target = InnerAppState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Arc<InnerAppState>> for SharedAppState {
    fn from(value: Arc<InnerAppState>) -> Self {
        Self(value)
    }
}

impl From<InnerAppState> for SharedAppState {
    fn from(value: InnerAppState) -> Self {
        Self(Arc::new(value))
    }
}
