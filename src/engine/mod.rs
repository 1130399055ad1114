mod context;
mod events;
mod runner;
mod state;
mod steps;

pub use context::ExecutionContext;
pub use events::EngineEvent;
pub use runner::SuiteRunner;
pub use state::{
    ScenarioOutcome, ScenarioReport, StepReport, StepStatus, SuiteReport, write_report,
};
pub use steps::{MatchedStep, StepHandler, StepLogger, StepRegistry, strip_keyword, value_key};
