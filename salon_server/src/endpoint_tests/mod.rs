mod helpers;
mod mocks;
mod payments;
mod reservations;
mod webhooks;

mod misc {
    use actix_web::{http::StatusCode, test::TestRequest};
    use salon_engine::test_utils::fixtures::TestSalon;

    use super::helpers::send;

    #[actix_web::test]
    async fn health() {
        let salon = TestSalon::new().await;
        let (status, body) = send(&salon, TestRequest::get().uri("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "👍️\n");
        salon.close().await;
    }
}
