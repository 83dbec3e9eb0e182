pub mod controller;
pub mod state;
pub mod tool_loop;
pub mod toolbox;

pub use controller::{AgentController, AgentReply, AgentStream};
pub use state::ConversationState;
pub use tool_loop::{run_agent_loop, run_agent_loop_stream, LoopOutcome, NullSink, StateSink};
pub use toolbox::{RetrieveDefaults, ToolExecution, ToolId, Toolbox};
