//! Client-facing API
//!
//! `signUp` and `auth` as consumed by the notes web client, plus session and
//! SASL operations.

pub mod client_api;
pub mod dto;

pub use client_api::{Authenticated, ClientApi};
pub use dto::{
    AuthRequest, AuthResponse, ChangePasswordRequest, DeleteAccountRequest, SignUpRequest,
    SignUpResponse,
};
