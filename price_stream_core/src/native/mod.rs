// Native implementations

pub mod websocket;

pub use websocket::TungsteniteConnector;
