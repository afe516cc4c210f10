#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod generator;
pub mod quiz;
pub mod recovery_service;
pub mod stats_service;
pub mod telemetry;

pub use quiz_core::Clock;

pub use app_services::AppServices;
pub use config::{GeneratorConfig, QuizConfig};
pub use error::{
    AppServicesError, ConfigError, GenerationError, QuizError, RecoveryError, StatsError,
};
pub use generator::{BatchRequest, HttpQuestionGenerator, QuestionGenerator};
pub use quiz::{QuizMachine, QuizPhase, QuizSessionService};
pub use recovery_service::RecoveryService;
pub use stats_service::StatsService;
