//! Subjects, courses, enrollment and course materials over HTTP.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use campusmate::db::models::UserRole;
use serde_json::json;

use common::{spawn_app, TestApp};

async fn create_course(app: &TestApp, admin: &str, professor_id: &str, max_students: i64) -> String {
    let (status, body) = app
        .post(
            "/courses",
            Some(admin),
            json!({
                "code": "CS101",
                "title": "Systems Programming",
                "subjectName": "Computer Science",
                "professorId": professor_id,
                "maxStudents": max_students,
                "difficultyLevel": "BEGINNER"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["subjectName"], "Computer Science");
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_only_admins_manage_subjects() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (_, student) = app.user("student@uni.edu", UserRole::Student);
    let subject = json!({
        "code": "MATH",
        "name": "Mathematics",
        "department": "Science",
        "difficulty": "INTERMEDIATE",
        "topics": ["algebra"]
    });

    let (status, _) = app.post("/subjects", Some(&student), subject.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post("/subjects", Some(&admin), subject).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (_, listed) = app.get("/subjects/difficulty/intermediate", None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, _) = app.get("/subjects/difficulty/impossible", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_enrollment_respects_course_capacity() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (tutor, tutor_token) = app.user("tutor@uni.edu", UserRole::Tutor);
    let (_, first) = app.user("first@uni.edu", UserRole::Student);
    let (_, second) = app.user("second@uni.edu", UserRole::Student);
    let course_id = create_course(&app, &admin, &tutor.id, 1).await;
    let enroll_uri = format!("/courses/{}/enroll", course_id);

    let (status, body) = app.post(&enroll_uri, Some(&first), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, _) = app.post(&enroll_uri, Some(&first), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.post(&enroll_uri, Some(&second), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");

    let (status, roster) = app
        .get(&format!("/courses/{}/enrollments", course_id), Some(&tutor_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roster["data"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .get(&format!("/courses/{}/enrollments", course_id), Some(&second))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, mine) = app.get("/courses/my-enrollments", Some(&first)).await;
    assert_eq!(mine["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_professor_must_be_able_to_teach() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (student, _) = app.user("student@uni.edu", UserRole::Student);

    let (status, _) = app
        .post(
            "/courses",
            Some(&admin),
            json!({
                "code": "CS102",
                "title": "Data Structures",
                "subjectName": "Computer Science",
                "professorId": student.id
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_text_material_downloads_inline() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (tutor, tutor_token) = app.user("tutor@uni.edu", UserRole::Tutor);
    let course_id = create_course(&app, &admin, &tutor.id, 30).await;

    let (status, body) = app
        .post(
            &format!("/courses/{}/materials", course_id),
            Some(&tutor_token),
            json!({
                "title": "Week 1 notes",
                "type": "LECTURE",
                "content": "Ownership and borrowing"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["type"], "LECTURE");
    let material_id = body["data"]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/courses/{}/materials/{}/download", course_id, material_id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("inline"));
    assert_eq!(&bytes[..], b"Ownership and borrowing");
}

#[tokio::test]
async fn test_multipart_upload_round_trips_bytes() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (tutor, tutor_token) = app.user("tutor@uni.edu", UserRole::Tutor);
    let (_, student) = app.user("student@uni.edu", UserRole::Student);
    let course_id = create_course(&app, &admin, &tutor.id, 30).await;

    let boundary = "campusmate-boundary";
    let payload: &[u8] = b"%PDF-1.4 fake pdf bytes";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nSyllabus\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"type\"\r\n\r\ndocument\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"syllabus.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let upload = |token: &str| {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/courses/{}/materials", course_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (status, _, _) = app.send_raw(upload(&student)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, bytes) = app.send_raw(upload(&tutor_token)).await;
    assert_eq!(status, StatusCode::CREATED);
    let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(created["data"]["fileName"], "syllabus.pdf");
    assert_eq!(created["data"]["type"], "DOCUMENT");
    assert_eq!(created["data"]["fileSize"], payload.len());
    let material_id = created["data"]["id"].as_str().unwrap().to_string();

    let (_, listed) = app
        .get(&format!("/courses/{}/materials", course_id), None)
        .await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let request = Request::builder()
        .uri(format!("/courses/{}/materials/{}/download", course_id, material_id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    assert_eq!(&bytes[..], payload);
}

#[tokio::test]
async fn test_download_header_survives_control_characters_in_file_name() {
    let app = spawn_app();
    let (_, admin) = app.user("admin@uni.edu", UserRole::Admin);
    let (tutor, tutor_token) = app.user("tutor@uni.edu", UserRole::Tutor);
    let course_id = create_course(&app, &admin, &tutor.id, 30).await;

    let (status, body) = app
        .post(
            &format!("/courses/{}/materials", course_id),
            Some(&tutor_token),
            json!({
                "title": "Week 2 notes",
                "type": "LECTURE",
                "fileName": "week2\r\nX-Injected: yes.txt",
                "content": "Traits and generics"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let material_id = body["data"]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/courses/{}/materials/{}/download", course_id, material_id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "inline; filename=\"week2X-Injected: yes.txt\""
    );
    assert!(headers.get("x-injected").is_none());
    assert_eq!(&bytes[..], b"Traits and generics");
}
