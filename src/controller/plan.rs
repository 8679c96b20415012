use crate::Placement;

/// Runnables requested together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStage {
    pub runnables: Vec<String>,
}

/// Launch stages of a placement, in order.
///
/// `Unordered` is a single stage holding every runnable. `Sequential` has one
/// stage per runnable; a stage is requested once every replica of the
/// previous one is running.
pub fn launch_plan(placement: &Placement) -> Vec<LaunchStage> {
    match placement {
        Placement::Unordered(runnables) => vec![LaunchStage {
            runnables: runnables.iter().map(|r| r.name.clone()).collect(),
        }],
        Placement::Sequential(runnables) => runnables
            .iter()
            .map(|r| LaunchStage {
                runnables: vec![r.name.clone()],
            })
            .collect(),
    }
}
