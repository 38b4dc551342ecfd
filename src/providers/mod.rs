mod strava;
mod traits;

pub use strava::StravaProvider;
pub use traits::{TokenGrant, UpstreamProvider};
