pub mod budget;
pub mod discover;
pub mod extract;
pub mod extract_stage;
pub mod fetch;
pub mod keyword_gate;
pub mod llm;
pub mod prompt;
pub mod triage_stage;

pub use discover::{run_discover, DiscoverOutcome};
pub use extract_stage::{run_extract_one, ExtractOutcome};
pub use fetch::{run_fetch_one, FetchOutcome, MAX_FETCH_RETRIES};
pub use llm::HttpLlmClient;
pub use triage_stage::{run_triage_and_case_build_one, TriageOutcome};
