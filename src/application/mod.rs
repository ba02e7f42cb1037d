pub mod config;
pub mod controller;
pub mod countdown;
pub mod dispatcher;
pub mod eventbus;
pub mod gate;
pub mod poller;
pub mod reconciler;

#[cfg(test)]
mod test_support;
