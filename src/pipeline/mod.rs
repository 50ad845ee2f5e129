// Pipeline Coordinator
//
// Four named work queues and the periodic update poller. Messages
// move strictly forward: check-updates -> check-orcidid -> match-claim
// -> output-results.

pub mod messages;
pub mod queues;
pub mod tasks;
