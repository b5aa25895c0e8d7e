pub mod unbounded;
