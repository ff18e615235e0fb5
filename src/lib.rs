pub mod cli;
pub mod config;
pub mod doctor;
pub mod download;
pub mod history;
pub mod menu;
pub mod models;
pub mod navigation;
pub mod player;
pub mod presence;
pub mod progress;
pub mod resolver;
pub mod rofi;
pub mod sources;
pub mod tui;
