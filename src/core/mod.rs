// Core module - Transport facade, receiver and message model
pub mod communication;
