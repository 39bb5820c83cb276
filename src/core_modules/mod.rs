pub mod classifier;
pub mod features;
pub mod frame;
pub mod motion;
pub mod oracle;
pub mod pixel;
pub mod region;
pub mod space;
pub mod stabilizer;
pub mod utils;
pub mod verification;
