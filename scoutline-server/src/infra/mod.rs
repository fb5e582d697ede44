pub mod amqp;
pub mod app_state;
pub mod signal;
pub mod startup;
