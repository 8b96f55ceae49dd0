//! Container exit-code interpretation.

use std::borrow::Cow;

/// Human description for a die-event exit code.
pub fn describe_exit_code(code: Option<i64>) -> Cow<'static, str> {
    let Some(code) = code else {
        return Cow::Borrowed("unknown exit code");
    };

    match code {
        0 => Cow::Borrowed("normal exit"),
        137 => Cow::Borrowed("killed by SIGKILL (possible OOM)"),
        143 => Cow::Borrowed("terminated by SIGTERM"),
        130 => Cow::Borrowed("interrupted (SIGINT)"),
        125 => Cow::Borrowed("container engine command failed"),
        126 => Cow::Borrowed("command not executable"),
        127 => Cow::Borrowed("command not found"),
        n if n > 128 => Cow::Owned(format!("fatal signal {}", n - 128)),
        _ => Cow::Borrowed("application error"),
    }
}

/// 0 is a clean exit and 143 (SIGTERM) an orderly shutdown; everything else,
/// including a missing code, counts as abnormal.
pub fn is_abnormal_exit(code: Option<i64>) -> bool {
    !matches!(code, Some(0) | Some(143))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exits_are_not_abnormal() {
        assert!(!is_abnormal_exit(Some(0)));
        assert!(!is_abnormal_exit(Some(143)));
    }

    #[test]
    fn everything_else_is_abnormal() {
        assert!(is_abnormal_exit(Some(1)));
        assert!(is_abnormal_exit(Some(137)));
        assert!(is_abnormal_exit(Some(130)));
        assert!(is_abnormal_exit(None));
    }

    #[test]
    fn signal_exits_describe_the_signal() {
        assert_eq!(describe_exit_code(Some(137)), "killed by SIGKILL (possible OOM)");
        assert_eq!(describe_exit_code(Some(139)), "fatal signal 11");
        assert_eq!(describe_exit_code(Some(0)), "normal exit");
        assert_eq!(describe_exit_code(Some(1)), "application error");
        assert_eq!(describe_exit_code(None), "unknown exit code");
    }

    #[test]
    fn exec_failures_have_specific_descriptions() {
        assert_eq!(describe_exit_code(Some(126)), "command not executable");
        assert_eq!(describe_exit_code(Some(127)), "command not found");
    }
}
