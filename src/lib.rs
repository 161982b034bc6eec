pub mod camera_rig;
pub mod config;
pub mod env_cube;
pub mod exterior;
pub mod input;
pub mod interaction;
pub mod navigation;
pub mod nodes;
pub mod picking;
pub mod space;
pub mod state;
pub mod texture_cache;
pub mod tween;
pub mod viewer;

pub use state::ViewMode;
pub use viewer::{NoopHooks, Viewer, ViewerHooks, ViewerParams};
