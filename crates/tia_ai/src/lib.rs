pub mod config;
pub mod corpus;
pub mod evidence;
pub mod knowledge;
pub mod llm;
pub mod prompts;
pub mod resolve;
pub mod suggest;
pub mod vision;
pub mod web;
