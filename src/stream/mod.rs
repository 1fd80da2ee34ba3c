//! Load orchestration for streamed scene objects

pub mod gate;
pub mod object;
pub mod scene;
pub mod task_pool;

pub use gate::{DestructionBlock, DestructionGate};
pub use object::{LoadState, Publication, StreamedObject, WithdrawStep};
pub use scene::{SceneRegistries, SceneStats, StreamingScene};
pub use task_pool::TaskPool;
