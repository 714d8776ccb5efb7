pub mod channel;
pub mod helicorder;
pub mod wave;

pub use channel::{ChannelKey, Scnl, EMPTY_LOCATION};
pub use helicorder::HelicorderRow;
pub use wave::{Wave, NO_DATA};
