mod determinism;
mod tick;
mod util;
