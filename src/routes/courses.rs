use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::catalog::courses::{self, Course, CourseFilter, CourseUpdate, NewCourse};
use crate::catalog::enrollments::{self, Enrollment};
use crate::catalog::materials::{self, MaterialSummary, NewMaterial, MAX_UPLOAD_BYTES};
use crate::db::models::MaterialType;
use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct KeywordParam {
    pub keyword: String,
}

/// JSON body for text materials.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub material_type: Option<String>,
    pub file_name: Option<String>,
    pub content: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list).post(create))
        .route("/courses/active", get(active))
        .route("/courses/available", get(available))
        .route("/courses/search", get(search))
        .route("/courses/my-enrollments", get(my_enrollments))
        .route("/courses/subject/{subject_id}", get(by_subject))
        .route("/courses/professor/{professor_id}", get(by_professor))
        .route("/courses/{id}", get(show).put(update).delete(remove))
        .route("/courses/{id}/enroll", post(enroll).delete(unenroll))
        .route("/courses/{id}/enrollments", get(course_enrollments))
        .route(
            "/courses/{id}/materials",
            get(list_materials)
                .post(add_material)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024)),
        )
        .route(
            "/courses/{id}/materials/{material_id}",
            axum::routing::delete(delete_material),
        )
        .route(
            "/courses/{id}/materials/{material_id}/download",
            get(download_material),
        )
}

fn listed(state: &AppState, filter: CourseFilter<'_>) -> AppResult<ApiResponse<Vec<Course>>> {
    let conn = state.db.get()?;
    let courses = courses::list(&conn, filter)?;
    Ok(ApiResponse::success("Courses retrieved successfully", courses))
}

async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::All)
}

async fn active(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::Active)
}

async fn available(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::Available)
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<KeywordParam>,
) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::Keyword(&params.keyword))
}

async fn by_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::Subject(&subject_id))
}

async fn by_professor(
    State(state): State<AppState>,
    Path(professor_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Course>>> {
    listed(&state, CourseFilter::Professor(&professor_id))
}

async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<ApiResponse<Course>> {
    let conn = state.db.get()?;
    let course = courses::get(&conn, &id)?;
    Ok(ApiResponse::success("Course retrieved successfully", course))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<NewCourse>,
) -> AppResult<(StatusCode, ApiResponse<Course>)> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let course = courses::create(&conn, &input)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Course created successfully", course),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(change): Json<CourseUpdate>,
) -> AppResult<ApiResponse<Course>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let course = courses::update(&conn, &id, &change)?;
    Ok(ApiResponse::success("Course updated successfully", course))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    courses::delete(&conn, &id)?;
    Ok(ApiResponse::message("Course deleted successfully"))
}

async fn enroll(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Enrollment>> {
    let mut conn = state.db.get()?;
    let enrollment = enrollments::enroll(&mut conn, &id, &user)?;
    Ok(ApiResponse::success("Enrolled successfully", enrollment))
}

async fn unenroll(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let conn = state.db.get()?;
    enrollments::unenroll(&conn, &id, &user)?;
    Ok(ApiResponse::message("Unenrolled successfully"))
}

async fn course_enrollments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<Enrollment>>> {
    let conn = state.db.get()?;
    let rows = enrollments::for_course(&conn, &id, &user)?;
    Ok(ApiResponse::success("Enrollments retrieved successfully", rows))
}

async fn my_enrollments(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<Enrollment>>> {
    let conn = state.db.get()?;
    let rows = enrollments::for_user(&conn, &user.id)?;
    Ok(ApiResponse::success("Enrollments retrieved successfully", rows))
}

async fn list_materials(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<MaterialSummary>>> {
    let conn = state.db.get()?;
    let materials = materials::list(&conn, &id)?;
    Ok(ApiResponse::success("Materials retrieved successfully", materials))
}

fn material_type(raw: Option<&str>) -> AppResult<MaterialType> {
    match raw.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => Ok(raw.parse::<MaterialType>()?),
        None => Ok(MaterialType::Other),
    }
}

/// Text materials arrive as JSON, uploads as multipart; the content type decides.
async fn add_material(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    request: Request,
) -> AppResult<(StatusCode, ApiResponse<MaterialSummary>)> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let material = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_upload(multipart).await?
    } else {
        let Json(body) = Json::<MaterialRequest>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        NewMaterial::text(
            &body.title,
            body.description,
            material_type(body.material_type.as_deref())?,
            body.file_name,
            body.content.as_deref(),
        )?
    };

    let conn = state.db.get()?;
    let summary = materials::add(&conn, &id, material, &user)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Material added successfully", summary),
    ))
}

async fn read_upload(mut multipart: Multipart) -> AppResult<NewMaterial> {
    let mut title = None;
    let mut description = None;
    let mut kind = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                file = Some((file_name, bytes.to_vec()));
            }
            "title" | "description" | "type" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "title" => title = Some(value),
                    "description" => description = Some(value).filter(|d| !d.trim().is_empty()),
                    _ => kind = Some(value),
                }
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| AppError::BadRequest("A file is required".into()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }
    let title = title.ok_or_else(|| AppError::BadRequest("Material title is required".into()))?;
    NewMaterial::file(
        &title,
        description,
        material_type(kind.as_deref())?,
        &file_name,
        bytes,
    )
}

async fn download_material(
    State(state): State<AppState>,
    Path((id, material_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let download = materials::download(&conn, &id, &material_id)?;
    let disposition = download.disposition();

    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response())
}

async fn delete_material(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, material_id)): Path<(String, String)>,
) -> AppResult<ApiResponse<()>> {
    let conn = state.db.get()?;
    materials::delete(&conn, &id, &material_id, &user)?;
    Ok(ApiResponse::message("Material deleted successfully"))
}
