//! Integration Tests for Segmask Server
//!
//! These tests drive the HTTP router end to end over an in-memory store.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use segmask_server::{MaskStore, SegmentationClient, codec};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

// ============================================================================
// Image lifecycle
// ============================================================================

mod images {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let app = create_test_app();
        let (status, json) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_upload_list_info_delete() {
        let app = create_test_app();
        let id = upload_image(&app, 6, 3).await;
        assert!(id.starts_with("img_"));

        let (status, json) = send(&app, get("/api/images")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["images"].as_array().unwrap().len(), 1);
        assert_eq!(json["images"][0]["id"], id.as_str());
        assert_eq!(json["images"][0]["mask_count"], 0);

        let (status, json) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["width"], 6);
        assert_eq!(json["height"], 3);
        assert_eq!(json["masks"], json!([]));

        let (status, json) = send(&app, delete(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["deleted"], true);

        let (status, json) = send(&app, delete(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "not_found");

        let (status, _) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_original_bytes_round_trip() {
        let app = create_test_app();
        let id = upload_image(&app, 2, 2).await;

        let response = tower::ServiceExt::oneshot(app, get(format!("/api/images/{id}/original")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), png_image(2, 2).as_slice());
    }

    #[tokio::test]
    async fn test_upload_rejects_garbage() {
        let app = create_test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/images")
            .body(Body::from("this is not an image"))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let app = create_test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/images")
            .body(Body::from(vec![0u8; 3 * 1024 * 1024]))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}

// ============================================================================
// Mask ingest and retrieval
// ============================================================================

mod masks {
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch_masks() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        let (status, json) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let masks = json["masks"].as_array().unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0]["id"], 1);
        assert_eq!(masks[0]["bbox"], json!([0, 0, 2, 2]));
        assert_eq!(masks[0]["area"], 4);
        assert_eq!(masks[1]["bbox"], json!([2, 2, 2, 2]));

        let (status, json) = send(&app, get(format!("/api/images/{id}/masks/2"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], 2);
        let bitmap = codec::decode_mask_b64(json["mask_b64"].as_str().unwrap()).unwrap();
        assert!(bitmap.get(3, 3));
        assert!(!bitmap.get(0, 0));
        assert_eq!(bitmap.area(), 4);
    }

    #[tokio::test]
    async fn test_unknown_mask_is_not_found() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let (status, json) = send(&app, get(format!("/api/images/{id}/masks/999"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["mask_id"], 999);
    }

    #[tokio::test]
    async fn test_wrong_size_batch_keeps_prior_masks() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        let body = json!({
            "masks": [
                { "mask_b64": mask_b64(4, 4, |_, _| true) },
                { "mask_b64": mask_b64(5, 5, |_, _| true) },
            ]
        });
        let (status, json) =
            send(&app, json_request("PUT", format!("/api/images/{id}/masks"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");
        assert_eq!(json["field"], "masks[1]");

        let (_, json) = send(&app, get(format!("/api/images/{id}"))).await;
        let ids: Vec<_> = json["masks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_undecodable_mask_names_its_index() {
        let app = create_test_app();
        let id = upload_image(&app, 4, 4).await;
        let body = json!({ "masks": [{ "mask_b64": mask_b64(4, 4, |_, _| false) }, { "mask_b64": "%%%" }] });
        let (status, json) =
            send(&app, json_request("PUT", format!("/api/images/{id}/masks"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["field"], "masks[1].mask_b64");
    }

    #[tokio::test]
    async fn test_malformed_batch_is_validation_error() {
        let app = create_test_app();
        let id = upload_image(&app, 4, 4).await;
        let body = json!({ "masks": "not-a-list" });
        let (status, json) =
            send(&app, json_request("PUT", format!("/api/images/{id}/masks"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");
        assert_eq!(json["field"], "masks");
    }

    #[tokio::test]
    async fn test_reingest_assigns_fresh_ids() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let body = json!({ "masks": [{ "mask_b64": mask_b64(4, 4, |x, _| x == 0) }] });
        let (status, json) =
            send(&app, json_request("PUT", format!("/api/images/{id}/masks"), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mask_ids"], json!([3]));

        let (status, _) = send(&app, get(format!("/api/images/{id}/masks/1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============================================================================
// Point queries
// ============================================================================

mod point_queries {
    use super::*;

    #[tokio::test]
    async fn test_mask_at_point() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        let (status, json) =
            send(&app, get(format!("/api/images/{id}/mask_at_point?x=1&y=1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mask_id"], 1);
        assert_eq!(json["all_containing_masks"], json!([1]));
        assert_eq!(json["total_masks_checked"], 2);

        let (status, json) =
            send(&app, get(format!("/api/images/{id}/mask_at_point?x=3&y=0"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["mask_id"].is_null());
        assert_eq!(json["all_containing_masks"], json!([]));
    }

    #[tokio::test]
    async fn test_out_of_range_point() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        for query in ["x=4&y=0", "x=0&y=4", "x=-1&y=2"] {
            let (status, json) =
                send(&app, get(format!("/api/images/{id}/mask_at_point?{query}"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
            assert_eq!(json["code"], "out_of_range");
            assert_eq!(json["width"], 4);
        }
    }

    #[tokio::test]
    async fn test_malformed_coordinates_are_validation_errors() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        for (query, field) in [("x=abc&y=0", "x"), ("x=1&y=1.5", "y"), ("y=0", "x"), ("x=0", "y")] {
            let (status, json) =
                send(&app, get(format!("/api/images/{id}/mask_at_point?{query}"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
            assert_eq!(json["code"], "validation_error", "{query}");
            assert_eq!(json["field"], field, "{query}");
        }
    }

    #[tokio::test]
    async fn test_point_query_unknown_image() {
        let app = create_test_app();
        let (status, _) = send(&app, get("/api/images/img_missing/mask_at_point?x=0&y=0")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============================================================================
// Rendering
// ============================================================================

mod rendering {
    use super::*;

    async fn render(app: &axum::Router, id: &str, instructions: serde_json::Value) -> (StatusCode, serde_json::Value) {
        send(
            app,
            json_request(
                "POST",
                format!("/api/images/{id}/render"),
                json!({ "render_instructions": instructions }),
            ),
        )
        .await
    }

    fn decode(json: &serde_json::Value) -> image::RgbaImage {
        let bytes = codec::decode_base64("rendered_image_b64", json["rendered_image_b64"].as_str().unwrap())
            .unwrap();
        image::load_from_memory(&bytes).unwrap().into_rgba8()
    }

    #[tokio::test]
    async fn test_render_disjoint_masks() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        let (status, json) = render(
            &app,
            &id,
            json!([
                { "mask_id": 1, "color": [255, 0, 0, 255] },
                { "mask_id": 2, "color": [0, 0, 255, 255] },
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let img = decode(&json);
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(3, 3).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(3, 0).0, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_empty_and_null_color_renders_are_transparent() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        for instructions in [json!([]), json!([{ "mask_id": 1, "color": null }])] {
            let (status, json) = render(&app, &id, instructions).await;
            assert_eq!(status, StatusCode::OK);
            assert!(decode(&json).pixels().all(|p| p.0[3] == 0));
        }
    }

    #[tokio::test]
    async fn test_render_unknown_mask() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let (status, json) = render(
            &app,
            &id,
            json!([{ "mask_id": 999, "color": [1, 2, 3, 255] }]),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["mask_id"], 999);
    }

    #[tokio::test]
    async fn test_render_bad_color() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let (status, json) = render(
            &app,
            &id,
            json!([{ "mask_id": 1, "color": [1, 2, 256, 255] }]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_malformed_colors_are_validation_errors() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;

        for color in [json!([1, 2, 3]), json!("red"), json!([0.5, 0, 0, 255]), json!([0, 0, 0, 1e20])] {
            let (status, json) = render(&app, &id, json!([{ "mask_id": 1, "color": color }])).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{color}");
            assert_eq!(json["code"], "validation_error", "{color}");
            assert_eq!(json["field"], "render_instructions", "{color}");
        }
    }

    #[tokio::test]
    async fn test_unparseable_render_body() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/images/{id}/render"))
            .header("Content-Type", "application/json")
            .body(Body::from("{\"render_instructions\": ["))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");
        assert_eq!(json["field"], "body");
    }

    #[tokio::test]
    async fn test_repeated_render_is_identical() {
        let app = create_test_app();
        let id = upload_disjoint_fixture(&app).await;
        let instructions = json!([
            { "mask_id": 2, "color": [20, 40, 60, 100] },
            { "mask_id": 1, "color": [200, 100, 0, 180] },
        ]);
        let (_, a) = render(&app, &id, instructions.clone()).await;
        let (_, b) = render(&app, &id, instructions).await;
        assert_eq!(a["rendered_image_b64"], b["rendered_image_b64"]);
    }
}

// ============================================================================
// Mask generation
// ============================================================================

mod generation {
    use super::*;

    #[tokio::test]
    async fn test_generation_without_service_is_unavailable() {
        let app = create_test_app();
        let id = upload_image(&app, 4, 4).await;
        let (status, json) = send(
            &app,
            json_request("POST", format!("/api/images/{id}/masks/generate"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_generation_completes() {
        let client: Arc<dyn SegmentationClient> = Arc::new(MockSegmentationClient {
            masks: 2,
            fail: false,
            delay: Duration::from_millis(10),
        });
        let (app, _) = create_test_app_with_state(Some(client));
        let id = upload_image(&app, 4, 4).await;

        let (status, json) = send(
            &app,
            json_request("POST", format!("/api/images/{id}/masks/generate"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "running");

        let mut last = serde_json::Value::Null;
        for _ in 0..200 {
            let (_, json) = send(&app, get(format!("/api/images/{id}/masks/generate"))).await;
            if json["status"] != "running" {
                last = json;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed");
        assert_eq!(last["mask_count"], 2);

        let (_, json) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(json["masks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_and_failure_leave_masks_alone() {
        let client: Arc<dyn SegmentationClient> = Arc::new(MockSegmentationClient {
            masks: 1,
            fail: false,
            delay: Duration::from_secs(60),
        });
        let (app, _) = create_test_app_with_state(Some(client));
        let id = upload_disjoint_fixture(&app).await;

        send(
            &app,
            json_request("POST", format!("/api/images/{id}/masks/generate"), json!({})),
        )
        .await;
        let (status, json) = send(&app, delete(format!("/api/images/{id}/masks/generate"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "cancelled");

        let (_, json) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(json["masks"].as_array().unwrap().len(), 2);

        let failing: Arc<dyn SegmentationClient> = Arc::new(MockSegmentationClient {
            masks: 0,
            fail: true,
            delay: Duration::ZERO,
        });
        let (app, state) = create_test_app_with_state(Some(failing));
        let id = upload_disjoint_fixture(&app).await;
        let err = state.generator.generate(&id).await.unwrap_err();
        assert_eq!(err.kind(), segmask_server::ErrorKind::ServiceUnavailable);
        let (_, json) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(json["masks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_generation_running() {
        let backend = Arc::new(FailingRemoveBackend::default());
        let store = Arc::new(MaskStore::open(backend.clone()).await.unwrap());
        let client: Arc<dyn SegmentationClient> = Arc::new(MockSegmentationClient {
            masks: 1,
            fail: false,
            delay: Duration::from_secs(60),
        });
        let (app, _) = create_test_app_with_store(store, Some(client));
        let id = upload_image(&app, 4, 4).await;

        let (status, _) = send(
            &app,
            json_request("POST", format!("/api/images/{id}/masks/generate"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        backend.set_failing(true);
        let (status, json) = send(&app, delete(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "storage_error");

        let (_, json) = send(&app, get(format!("/api/images/{id}/masks/generate"))).await;
        assert_eq!(json["status"], "running");

        backend.set_failing(false);
        let (status, _) = send(&app, delete(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, get(format!("/api/images/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
