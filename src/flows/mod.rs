//! Multi-turn conversational flows with persisted step position.

pub mod onboarding;
pub mod registration;

pub use onboarding::OnboardingFlow;
pub use registration::RegistrationFlow;
