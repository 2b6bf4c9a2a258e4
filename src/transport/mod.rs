//! Outbound service clients.

pub mod onboarding;

pub use onboarding::{
    DiscoveryRequest, GatewayError, HttpOnboardingGateway, OnboardingGateway, ONVIF_HTTP_PORT,
};
