mod live;
mod replay;

pub use live::{fetch_warm_start, run_live, SessionSummary, TraderEvent};
pub use replay::{load_chain, load_history, load_ticks, run_replay};
