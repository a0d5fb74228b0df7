/*!
Command dispatcher module.

Only module declarations and re-exports live here; each subcommand has its
own file.

Directory Layout:
  src/cmd/
    mod.rs          (this file)
    exec.rs         (ExecArgs   + execute_exec)   operator side
    handle.rs       (HandleArgs + execute_handle) node side
    format.rs       (per-node output lines)
    shared.rs       (connection settings, config file, durations)

Conventions:
  - Each subcommand module exposes exactly one public `execute_*` function
    returning `anyhow::Result<i32>` (the process exit status).
  - Argument structs derive `clap::Args` and are kept minimal.
  - Protocol logic stays in `crate::rexec`; these modules only translate
    flags and print results.
*/

pub mod exec;
pub mod format;
pub mod handle;
pub mod shared;

pub use exec::{ExecArgs, execute_exec};
pub use handle::{HandleArgs, execute_handle};
