pub mod jobs;
pub mod refresher;

pub use jobs::{parse_schedule, CronJobs};
pub use refresher::StaticRefresher;
