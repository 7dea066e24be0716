use std::fmt;

/// The seven states of one test's execution (§4.1). Initial: `Setup`.
/// Terminal: the actor simply stops after `ShuttingDown`'s entry side
/// effects run — there is no state reachable from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Setup,
    Loading,
    Loaded,
    Testing,
    Completed,
    Exception,
    ShuttingDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "Setup",
            Self::Loading => "Loading",
            Self::Loaded => "Loaded",
            Self::Testing => "Testing",
            Self::Completed => "Completed",
            Self::Exception => "Exception",
            Self::ShuttingDown => "ShuttingDown",
        };
        f.write_str(name)
    }
}
