//! Actionable hints attached to errors at the REPL edge

use super::TrifectaError;

/// Extension trait mapping errors to a next command the operator can run
pub trait ErrorHint {
    /// A helpful hint for resolving this error, when one exists
    fn hint(&self) -> Option<String>;
}

impl ErrorHint for TrifectaError {
    fn hint(&self) -> Option<String> {
        match self {
            TrifectaError::ZkConnectionLost => {
                Some("The ZooKeeper connection was lost. Try: zreconnect".to_string())
            }
            TrifectaError::InvalidArgs { command, .. } => {
                Some(format!("Usage help is available via: syntax {command}"))
            }
            TrifectaError::LeaderUnavailable { topic, .. } => Some(format!(
                "No broker answered for '{topic}'. Check the broker list with: kbrokers"
            )),
            TrifectaError::ZkNotFound(path) => {
                Some(format!("'{path}' does not exist. List siblings with: zls"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_suggests_reconnect() {
        let hint = TrifectaError::ZkConnectionLost.hint().expect("hint");
        assert!(hint.contains("zreconnect"));
    }

    #[test]
    fn invalid_args_suggests_syntax() {
        let err = TrifectaError::invalid_args("zget", "missing required argument 'key'");
        assert!(err.hint().expect("hint").contains("syntax zget"));
    }
}
