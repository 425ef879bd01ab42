//! Local shell sessions on pseudo-terminals

mod manager;
mod session;
mod shell;

pub use manager::SessionManager;
pub use session::PtySession;
pub use shell::{check_shell_path, verify_shell, ShellSettings};
