//! Control-signal and phase vocabulary shared by every interceptor.

use std::fmt;
use std::ops::BitOr;

/// Control signal returned by every interceptor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Proceed with the next interceptor.
    Continue,
    /// Stop the request pass and proceed to the response pass, skipping the
    /// backend call.
    Return,
    /// Stop and proceed to the abort pass.
    Abort,
}

impl Outcome {
    /// Whether the caller should keep iterating.
    #[must_use]
    pub fn is_continue(self) -> bool {
        self == Self::Continue
    }

    /// Ordering used when several outcomes must be folded into one:
    /// `Abort` outranks `Return`, which outranks `Continue`.
    #[must_use]
    pub fn most_severe(self, other: Self) -> Self {
        fn rank(o: Outcome) -> u8 {
            match o {
                Outcome::Continue => 0,
                Outcome::Return => 1,
                Outcome::Abort => 2,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Continue => "continue",
            Self::Return => "return",
            Self::Abort => "abort",
        })
    }
}

/// The phase an exchange is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Request,
    Response,
    Abort,
}

impl Flow {
    /// Lowercase name exposed to expressions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of phases an interceptor participates in, declared once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flows(u8);

impl Flows {
    const REQUEST_BIT: u8 = 0b001;
    const RESPONSE_BIT: u8 = 0b010;
    const ABORT_BIT: u8 = 0b100;

    pub const REQUEST: Self = Self(Self::REQUEST_BIT);
    pub const RESPONSE: Self = Self(Self::RESPONSE_BIT);
    pub const ABORT: Self = Self(Self::ABORT_BIT);
    pub const REQUEST_RESPONSE: Self = Self(Self::REQUEST_BIT | Self::RESPONSE_BIT);
    pub const REQUEST_RESPONSE_ABORT: Self =
        Self(Self::REQUEST_BIT | Self::RESPONSE_BIT | Self::ABORT_BIT);

    /// Whether the set includes the given phase.
    #[must_use]
    pub fn contains(self, flow: Flow) -> bool {
        let bit = match flow {
            Flow::Request => Self::REQUEST_BIT,
            Flow::Response => Self::RESPONSE_BIT,
            Flow::Abort => Self::ABORT_BIT,
        };
        self.0 & bit != 0
    }

    #[must_use]
    pub fn handles_requests(self) -> bool {
        self.contains(Flow::Request)
    }

    #[must_use]
    pub fn handles_responses(self) -> bool {
        self.contains(Flow::Response)
    }

    #[must_use]
    pub fn handles_aborts(self) -> bool {
        self.contains(Flow::Abort)
    }
}

impl BitOr for Flows {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<Flow> for Flows {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::Request => Self::REQUEST,
            Flow::Response => Self::RESPONSE,
            Flow::Abort => Self::ABORT,
        }
    }
}
