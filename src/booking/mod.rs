pub mod dispatcher;
pub mod intent;
pub mod machine;

pub use dispatcher::IntentDispatcher;
pub use intent::{Intent, Outcome, OutcomeKind};
pub use machine::{transition, BookingMachine, Effect, TransitionPlan};
