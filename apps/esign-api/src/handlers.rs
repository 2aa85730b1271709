//! HTTP handlers for the e-sign API

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use esign_core::{
    ClientContext, DocumentStore, FileStore, IntegrityReport, SignatureSubmission, TimelineEntry,
    Verification,
};
use esign_types::{AuditLogEntry, DocumentMetadata, NewDocument, SignatureDocument};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Caller address and agent, as seen through a proxy when there is one
fn client_context(headers: &HeaderMap, access_code: Option<String>) -> ClientContext {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let client = ClientContext::new(ip, agent);
    match access_code {
        Some(code) => client.with_access_code(&code),
        None => client,
    }
}

fn pdf_response(bytes: Vec<u8>, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn signing_response(
    doc: &SignatureDocument,
    recipient_id: &str,
) -> ApiResult<Json<SigningResponse>> {
    SigningResponse::for_recipient(doc, recipient_id)
        .map(Json)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("recipient vanished from document")))
}

/// Create a draft document from an uploaded PDF
pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDocumentRequest>,
) -> ApiResult<(StatusCode, Json<DocumentResponse>)> {
    let pdf_data = BASE64
        .decode(req.pdf_base64.trim())
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid PDF base64: {}", e)))?;
    let metadata = DocumentMetadata::from_map(req.metadata)?;
    let expires_at = req
        .expires_in_hours
        .map(|h| Utc::now() + chrono::Duration::hours(h));

    let key = format!("sources/{}.pdf", Uuid::new_v4());
    let source = state.files.put(&key, pdf_data).await?;

    let doc = state
        .service
        .create_document(NewDocument {
            team_id: req.team_id,
            title: req.title,
            source,
            expires_at,
            metadata,
            recipients: req.recipients.into_iter().map(RecipientInput::into_new).collect(),
            fields: req.fields,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(doc.into())))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DocumentResponse>> {
    Ok(Json(state.service.document(&id).await?.into()))
}

pub async fn send_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DocumentResponse>> {
    Ok(Json(state.service.dispatch(&id).await?.into()))
}

pub async fn expire_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DocumentResponse>> {
    Ok(Json(state.service.expire(&id).await?.into()))
}

pub async fn view_document(
    State(state): State<Arc<AppState>>,
    Path(recipient_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ViewRequest>,
) -> ApiResult<Json<SigningResponse>> {
    let client = client_context(&headers, req.access_code);
    let doc = state.service.record_view(&recipient_id, client).await?;
    signing_response(&doc, &recipient_id)
}

pub async fn sign_document(
    State(state): State<Arc<AppState>>,
    Path(recipient_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SignRequest>,
) -> ApiResult<Json<SigningResponse>> {
    let client = client_context(&headers, req.access_code);
    let submission = SignatureSubmission {
        field_values: req.field_values,
        signature_image: req.signature_image,
    };
    let doc = state
        .service
        .record_signature(&recipient_id, submission, client)
        .await?;
    signing_response(&doc, &recipient_id)
}

pub async fn decline_document(
    State(state): State<Arc<AppState>>,
    Path(recipient_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DeclineRequest>,
) -> ApiResult<Json<SigningResponse>> {
    let client = client_context(&headers, req.access_code);
    let doc = state
        .service
        .record_decline(&recipient_id, req.reason, client)
        .await?;
    signing_response(&doc, &recipient_id)
}

/// Completed PDF with all fields applied
pub async fn final_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let pdf = state.service.render_final_document(&id).await?;
    Ok(pdf_response(pdf, &format!("{}.pdf", id)))
}

pub async fn generate_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<CertificateResponse>)> {
    let certificate = state.service.generate_certificate(&id).await?;
    let status = if certificate.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(certificate.into())))
}

pub async fn download_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let certificate = state.service.download_certificate(&id).await?;
    let filename = format!("{}.pdf", certificate.record.certificate_id);
    Ok(pdf_response(certificate.pdf, &filename))
}

pub async fn verify_certificate(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
) -> ApiResult<Json<Verification>> {
    Ok(Json(state.service.verify_certificate(&certificate_id).await?))
}

pub async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    // Surface unknown documents instead of an empty trail
    state.service.store().load(&id).await?;
    Ok(Json(state.service.audit_trail(&id).await?))
}

pub async fn timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TimelineEntry>>> {
    Ok(Json(state.service.timeline(&id).await?))
}

pub async fn verify_integrity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<IntegrityReport>> {
    Ok(Json(state.service.verify_document_integrity(&id).await?))
}

pub async fn protect_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProtectRequest>,
) -> ApiResult<Json<PasswordResponse>> {
    let password = state
        .service
        .protect_completed_document(&id, req.password)
        .await?;
    Ok(Json(PasswordResponse {
        document_id: id,
        password: password.as_str().to_string(),
    }))
}

pub async fn reveal_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RevealRequest>,
) -> ApiResult<Json<PasswordResponse>> {
    let password = state
        .service
        .reveal_document_password(&id, req.requested_by.as_deref())
        .await?;
    Ok(Json(PasswordResponse {
        document_id: id,
        password: password.as_str().to_string(),
    }))
}
