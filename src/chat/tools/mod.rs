pub mod base;
pub mod registry;
pub mod repo;
pub mod shell;

pub use base::Tool;
pub use registry::ToolRegistry;
pub use repo::RepoTool;
pub use shell::ShellTool;
