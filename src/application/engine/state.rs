/// Lifecycle states of a `TradingEngine`.
///
/// ```text
/// Terminated --initialize()--> Initialized
/// Initialized --start()------> Running
/// Running ------stop()-------> Stopping --(loop exits)--> Terminated
/// Terminated --stop()--------> Terminated        (no-op; also cancels stray orders)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Terminated,
    Initialized,
    Running,
    Stopping,
}
