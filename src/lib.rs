pub mod app;

/// Entry point shared by the `adb_gripper` binary. Returns the process exit code.
pub fn run() -> i32 {
    app::cli::run_from_args()
}
