pub mod controller;
mod pipeline;
mod worker;
