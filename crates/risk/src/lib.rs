pub mod session;
pub mod sizing;

pub use session::{
    evaluate_market_conditions, is_market_open, time_until_close, time_until_next_change,
    MarketConditions, SESSION_CLOSE_BUFFER_MINUTES,
};
pub use sizing::{
    position_units, SizingInput, ANNOUNCEMENT_BLACKOUT_MINUTES, SIMULATION_EQUITY, SIMULATION_FEE,
};
