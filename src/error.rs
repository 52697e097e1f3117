use crate::order::Pid;
use crate::sync::State;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("protocol violation by {from}: {reason}")]
    ProtocolViolation { from: Pid, reason: String },

    #[error("channel failure: {0}")]
    ChannelFailure(String),

    #[error("cannot {op} while {state}")]
    IllegalState { op: &'static str, state: State },

    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn violation(from: Pid, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            from,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Configuration("peer set is empty".to_string());
        assert_eq!(err.to_string(), "configuration error: peer set is empty");

        let err = Error::violation(Pid(2), "duplicate request");
        assert_eq!(
            err.to_string(),
            "protocol violation by p2: duplicate request"
        );

        let err = Error::IllegalState {
            op: "release",
            state: State::Waiting,
        };
        assert_eq!(err.to_string(), "cannot release while WAITING");
    }
}
