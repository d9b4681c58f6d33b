// Domain layer: run model and the ports the engines/sources plug into.

pub mod model;
pub mod ports;
