mod barrier;

pub use barrier::barrier;
