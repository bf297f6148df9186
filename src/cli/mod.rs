pub mod alerts;
pub mod insights;
pub mod prices;
pub mod session;
pub mod setup;
pub mod ui;
