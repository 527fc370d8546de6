//! Run 层：状态机、编排策略、执行引擎与过程事件

pub mod engine;
pub mod events;
pub mod policy;
pub mod state;

pub use engine::RunEngine;
pub use events::RunEvent;
pub use policy::{Action, FnPolicy, OrchestratorPolicy, PolicyInput, RetrieveThenAnswerPolicy, ScriptedPolicy};
pub use state::{Run, RunId, RunStatus, RunStore, ToolCall};
