pub mod chat;
pub mod outbound;

pub use chat::{apply_completion, parse_completion};
pub use outbound::{LeadSink, LeadSubmission, LoggingLeadSink, OutboundSnapshot, SupabaseLeadSink};
