use std::backtrace::Backtrace;

/// Macro for logging errors with filtered backtraces.
/// Example
/// ```
/// use caretask_utils::error_with_backtrace;
///
/// let err = "boom";
/// error_with_backtrace!(error = %err, "Something went wrong");
/// ```
#[macro_export]
macro_rules! error_with_backtrace {
    ($($arg:tt)*) => {
        {
            let filtered_trace = $crate::backtrace::app_focused_backtrace();
            tracing::error!(
                backtrace = %filtered_trace,
                $($arg)*
            );
        }
    };
}

/// Filter a captured backtrace down to frames inside this workspace.
pub fn app_focused_backtrace() -> String {
    let backtrace = Backtrace::capture();
    let backtrace_str = format!("{backtrace:?}");

    backtrace_str
        .lines()
        .filter(|line| {
            (line.contains("caretask_") || line.contains("crates/"))
                && !line.contains("registry/src")
                && !line.contains("std::")
                && !line.contains("core::")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
