/// Logs a line under a per-component target (`mesh_ingest::<component>`).
///
/// The fern dispatcher set up in `main.rs` prints the target next to the
/// level, so every line names the pipeline stage that produced it:
///
/// ```text
/// [2025-04-25T16:32:10+02:00][WARN ][mesh_ingest::store][pid=4568][tid=ThreadId(3)] child before primary (key=7)
/// ```
///
/// Usage:
/// ```rust
/// use log::Level;
/// mesh_ingest::ingest_log!(Level::Info, "flush", "committed {} unit(s)", 3);
/// ```
#[macro_export]
macro_rules! ingest_log {
    ($level:expr, $component:literal, $fmt:literal $(, $($arg:tt)+)?) => {
        log::log!(
            target: concat!("mesh_ingest::", $component),
            $level,
            $fmt
            $(, $($arg)+)?
        );
    };
}
