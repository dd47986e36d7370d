// Best-effort stderr logging that never panics.
//
// The agent is often run with stderr piped into a supervisor that may go away;
// `eprintln!` panics on a broken pipe, so write errors are ignored here.

#[macro_export]
macro_rules! safe_eprintln {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let _ = writeln!(std::io::stderr(), $($arg)*);
    }};
}

/// Same as `safe_eprintln!`, for the dashboard and command output on stdout.
#[macro_export]
macro_rules! safe_println {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let _ = writeln!(std::io::stdout(), $($arg)*);
    }};
}
