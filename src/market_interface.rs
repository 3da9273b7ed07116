// Market Interface - JSON API over the marketplace stores
// Legacy car listings live under /listings, universal listings under /v2/listings.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    app_state::AppState,
    core::{Page, Pagination},
    domains::{
        accounts::{self, User},
        catalog::{self, Category, CategoryAttribute},
        dealers::{self, DealerProfile, DealerProfileUpdate, NewDealerProfile},
        favorites,
        leads::{self, NewInquiry},
        legacy::{self, CarListingUpdate, NewCarListing},
        listings::{self, ListingStatus, ListingUpdate, NewListing},
        projection::ListingCard,
        ListingGeneration,
    },
    error::{AppError, AppResult},
    image_interface,
    infrastructure::{
        middleware::{viewer_context_middleware, Vc},
        security::{AuthPayload, AuthTokens},
    },
    services::{
        listing_search::{self, CarListingFilter, ListingFilter},
        listing_views::{self, CarListingView, LeadView, ListingView, ListingViewService},
    },
};

// Request bodies

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Filters plus pagination; both default to empty.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SearchRequest<F> {
    pub filters: F,
    pub pagination: Pagination,
}

fn views_for<'a>(state: &'a AppState, vc: &Vc) -> ListingViewService<'a> {
    ListingViewService::new(state.blobs.as_ref(), vc.user_id)
}

// Health

pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.db.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

// Accounts

pub async fn register_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthPayload>), AppError> {
    let mut conn = state.db.acquire().await?;
    let payload = state
        .security
        .register(&mut conn, &req.username, &req.email, &req.password)
        .await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthPayload>, AppError> {
    let mut conn = state.db.acquire().await?;
    let payload = state
        .security
        .login(&mut conn, &req.username, &req.password)
        .await?;
    Ok(Json(payload))
}

pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthTokens>, AppError> {
    Ok(Json(state.security.refresh(&req.refresh)?))
}

/// Tokens are stateless; logging out is left to the client.
pub async fn logout_handler(Json(_req): Json<RefreshRequest>) -> Json<Value> {
    Json(json!({"ok": true}))
}

pub async fn me_handler(State(state): State<AppState>, vc: Vc) -> Result<Json<User>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let user = accounts::get_user(&mut conn, user_id)
        .await?
        .ok_or_else(|| AppError::AuthenticationRequired("Authentication required.".to_string()))?;
    Ok(Json(user))
}

// Dealers

pub async fn list_dealers_handler(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<DealerProfile>>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(dealers::list_dealers(&mut conn, pagination).await?))
}

pub async fn get_dealer_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<DealerProfile>, AppError> {
    let mut conn = state.db.acquire().await?;
    let dealer = dealers::get_dealer(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Dealer not found.".to_string()))?;
    Ok(Json(dealer))
}

pub async fn create_dealer_profile_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(input): Json<NewDealerProfile>,
) -> Result<(StatusCode, Json<DealerProfile>), AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let dealer = dealers::create_dealer_profile(&mut conn, user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(dealer)))
}

pub async fn update_dealer_profile_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(update): Json<DealerProfileUpdate>,
) -> Result<Json<DealerProfile>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    Ok(Json(dealers::update_dealer_profile(&mut conn, user_id, &update).await?))
}

// Legacy car listings

pub async fn list_car_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<CarListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let rows =
        listing_search::search_car_listings(&mut conn, &CarListingFilter::default(), pagination)
            .await?;
    Ok(Json(views_for(&state, &vc).car_listings(&mut conn, rows).await?))
}

pub async fn search_car_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(req): Json<SearchRequest<CarListingFilter>>,
) -> Result<Json<Vec<CarListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let rows = listing_search::search_car_listings(&mut conn, &req.filters, req.pagination).await?;
    Ok(Json(views_for(&state, &vc).car_listings(&mut conn, rows).await?))
}

pub async fn car_listings_page_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(req): Json<SearchRequest<CarListingFilter>>,
) -> Result<Json<Page<CarListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let page = listing_search::car_listings_page(&mut conn, &req.filters, req.pagination).await?;
    let views = views_for(&state, &vc)
        .car_listings(&mut conn, page.results)
        .await?;
    Ok(Json(Page {
        total_count: page.total_count,
        page_info: page.page_info,
        results: views,
    }))
}

pub async fn get_car_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<CarListingView>, AppError> {
    let mut conn = state.db.acquire().await?;
    let listing = legacy::get_published(&mut conn, id)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(Json(views_for(&state, &vc).car_listing(&mut conn, listing).await?))
}

pub async fn get_car_listing_by_slug_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(slug): AxumPath<String>,
) -> Result<Json<CarListingView>, AppError> {
    let mut conn = state.db.acquire().await?;
    let listing = legacy::get_published_by_slug(&mut conn, &slug)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(Json(views_for(&state, &vc).car_listing(&mut conn, listing).await?))
}

pub async fn create_car_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(input): Json<NewCarListing>,
) -> Result<(StatusCode, Json<CarListingView>), AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let listing = legacy::create_car_listing(&mut tx, dealer.id, Some(user_id), &input).await?;
    let view = views_for(&state, &vc).car_listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_car_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
    Json(update): Json<CarListingUpdate>,
) -> Result<Json<CarListingView>, AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let listing = legacy::update_car_listing(&mut tx, id, dealer.id, &update).await?;
    let view = views_for(&state, &vc).car_listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok(Json(view))
}

async fn set_car_status(
    state: &AppState,
    vc: &Vc,
    id: i64,
    status: ListingStatus,
) -> AppResult<CarListingView> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let listing = legacy::set_status(&mut tx, id, dealer.id, status).await?;
    let view = views_for(state, vc).car_listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok(view)
}

pub async fn publish_car_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<CarListingView>, AppError> {
    Ok(Json(set_car_status(&state, &vc, id, ListingStatus::Published).await?))
}

pub async fn mark_car_sold_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<CarListingView>, AppError> {
    Ok(Json(set_car_status(&state, &vc, id, ListingStatus::Sold).await?))
}

pub async fn delete_car_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    legacy::delete_car_listing(&mut tx, id, dealer.id).await?;
    tx.commit().await?;
    Ok(Json(json!({"id": id, "deleted": true})))
}

pub async fn create_inquiry_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
    Json(input): Json<NewInquiry>,
) -> Result<(StatusCode, Json<LeadView>), AppError> {
    let mut tx = state.db.begin().await?;
    let lead = leads::create_inquiry(&mut tx, id, &input).await?;
    let mut views = views_for(&state, &vc).leads(&mut tx, vec![lead]).await?;
    tx.commit().await?;
    let view = views
        .pop()
        .ok_or_else(|| AppError::Internal("Lead view missing".to_string()))?;
    Ok((StatusCode::CREATED, Json(view)))
}

// Favorites and views, both generations

async fn toggle_favorite(
    state: &AppState,
    vc: &Vc,
    generation: ListingGeneration,
    id: i64,
) -> AppResult<Json<Value>> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let is_favorited = favorites::toggle(&mut tx, generation, user_id, id).await?;
    tx.commit().await?;
    Ok(Json(json!({"listing_id": id, "is_favorited": is_favorited})))
}

pub async fn toggle_car_favorite_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    toggle_favorite(&state, &vc, ListingGeneration::Legacy, id).await
}

pub async fn toggle_favorite_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    toggle_favorite(&state, &vc, ListingGeneration::Universal, id).await
}

pub async fn increment_car_view_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let mut conn = state.db.acquire().await?;
    let views_count = legacy::increment_views(&mut conn, id).await?;
    Ok(Json(json!({"listing_id": id, "views_count": views_count})))
}

pub async fn increment_view_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let mut conn = state.db.acquire().await?;
    let views_count = listings::increment_views(&mut conn, id).await?;
    Ok(Json(json!({"listing_id": id, "views_count": views_count})))
}

// Caller-scoped lists

pub async fn my_car_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<CarListingView>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let Some(dealer) = dealers::find_by_user(&mut conn, user_id).await? else {
        return Ok(Json(Vec::new()));
    };
    let rows = legacy::list_for_dealer(&mut conn, dealer.id, pagination).await?;
    Ok(Json(views_for(&state, &vc).car_listings(&mut conn, rows).await?))
}

pub async fn my_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ListingView>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let Some(dealer) = dealers::find_by_user(&mut conn, user_id).await? else {
        return Ok(Json(Vec::new()));
    };
    let rows = listings::list_for_dealer(&mut conn, dealer.id, pagination).await?;
    Ok(Json(views_for(&state, &vc).listings(&mut conn, rows).await?))
}

/// Both generations merged, newest first
pub async fn my_dashboard_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ListingCard>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let Some(dealer) = dealers::find_by_user(&mut conn, user_id).await? else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(
        listing_views::dealer_listing_cards(&mut conn, dealer.id, pagination).await?,
    ))
}

pub async fn my_leads_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<LeadView>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let Some(dealer) = dealers::find_by_user(&mut conn, user_id).await? else {
        return Ok(Json(Vec::new()));
    };
    let rows = leads::list_for_dealer(&mut conn, dealer.id, pagination).await?;
    Ok(Json(views_for(&state, &vc).leads(&mut conn, rows).await?))
}

pub async fn my_car_favorites_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<CarListingView>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let ids =
        favorites::favorite_listing_ids(&mut conn, ListingGeneration::Legacy, user_id, pagination)
            .await?;
    let rows = legacy::get_many(&mut conn, &ids).await?;
    Ok(Json(views_for(&state, &vc).car_listings(&mut conn, rows).await?))
}

pub async fn my_favorites_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ListingView>>, AppError> {
    let user_id = vc.require_user()?;
    let mut conn = state.db.acquire().await?;
    let ids = favorites::favorite_listing_ids(
        &mut conn,
        ListingGeneration::Universal,
        user_id,
        pagination,
    )
    .await?;
    let rows = listings::get_many(&mut conn, &ids).await?;
    Ok(Json(views_for(&state, &vc).listings(&mut conn, rows).await?))
}

// Categories

pub async fn list_categories_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(catalog::list_categories(&mut conn).await?))
}

pub async fn get_category_handler(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
) -> Result<Json<Category>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(catalog::get_category(&mut conn, &slug).await?))
}

pub async fn category_attributes_handler(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
) -> Result<Json<Vec<CategoryAttribute>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let category = catalog::get_category(&mut conn, &slug).await?;
    Ok(Json(catalog::list_attributes(&mut conn, category.id).await?))
}

// Universal listings

pub async fn list_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let rows =
        listing_search::search_listings(&mut conn, &ListingFilter::default(), pagination).await?;
    Ok(Json(views_for(&state, &vc).listings(&mut conn, rows).await?))
}

pub async fn search_listings_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(req): Json<SearchRequest<ListingFilter>>,
) -> Result<Json<Vec<ListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let rows = listing_search::search_listings(&mut conn, &req.filters, req.pagination).await?;
    Ok(Json(views_for(&state, &vc).listings(&mut conn, rows).await?))
}

pub async fn listings_page_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(req): Json<SearchRequest<ListingFilter>>,
) -> Result<Json<Page<ListingView>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let page = listing_search::listings_page(&mut conn, &req.filters, req.pagination).await?;
    let views = views_for(&state, &vc).listings(&mut conn, page.results).await?;
    Ok(Json(Page {
        total_count: page.total_count,
        page_info: page.page_info,
        results: views,
    }))
}

pub async fn get_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<ListingView>, AppError> {
    let mut conn = state.db.acquire().await?;
    let listing = listings::get_published(&mut conn, id)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(Json(views_for(&state, &vc).listing(&mut conn, listing).await?))
}

pub async fn get_listing_by_slug_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(slug): AxumPath<String>,
) -> Result<Json<ListingView>, AppError> {
    let mut conn = state.db.acquire().await?;
    let listing = listings::get_published_by_slug(&mut conn, &slug)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(Json(views_for(&state, &vc).listing(&mut conn, listing).await?))
}

pub async fn create_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(input): Json<NewListing>,
) -> Result<(StatusCode, Json<ListingView>), AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let category = catalog::get_category(&mut tx, &input.category_slug).await?;
    let listing =
        listings::create_listing(&mut tx, dealer.id, Some(user_id), &category, &input).await?;
    let view = views_for(&state, &vc).listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
    Json(update): Json<ListingUpdate>,
) -> Result<Json<ListingView>, AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let listing = listings::update_listing(&mut tx, id, dealer.id, &update).await?;
    let view = views_for(&state, &vc).listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok(Json(view))
}

async fn set_listing_status(
    state: &AppState,
    vc: &Vc,
    id: i64,
    status: ListingStatus,
) -> AppResult<ListingView> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    let listing = listings::set_status(&mut tx, id, dealer.id, status).await?;
    let view = views_for(state, vc).listing(&mut tx, listing).await?;
    tx.commit().await?;
    Ok(view)
}

pub async fn publish_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<ListingView>, AppError> {
    Ok(Json(set_listing_status(&state, &vc, id, ListingStatus::Published).await?))
}

pub async fn mark_sold_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<ListingView>, AppError> {
    Ok(Json(set_listing_status(&state, &vc, id, ListingStatus::Sold).await?))
}

pub async fn archive_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<ListingView>, AppError> {
    Ok(Json(set_listing_status(&state, &vc, id, ListingStatus::Archived).await?))
}

pub async fn delete_listing_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let user_id = vc.require_user()?;
    let mut tx = state.db.begin().await?;
    let dealer = dealers::resolve_dealer(&mut tx, user_id).await?;
    listings::delete_listing(&mut tx, id, dealer.id).await?;
    tx.commit().await?;
    Ok(Json(json!({"id": id, "deleted": true})))
}

fn listing_not_found() -> AppError {
    AppError::NotFound("Listing not found.".to_string())
}

/// Routes of the JSON API, relative to `/api/v1`.
pub fn create_market_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        // Accounts
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        // Dealers
        .route("/dealers", get(list_dealers_handler))
        .route("/dealers/{id}", get(get_dealer_handler))
        .route(
            "/me/dealer",
            post(create_dealer_profile_handler).patch(update_dealer_profile_handler),
        )
        // Caller-scoped lists
        .route("/me/listings", get(my_car_listings_handler))
        .route("/me/listings/v2", get(my_listings_handler))
        .route("/me/dashboard", get(my_dashboard_handler))
        .route("/me/leads", get(my_leads_handler))
        .route("/me/favorites", get(my_car_favorites_handler))
        .route("/me/favorites/v2", get(my_favorites_handler))
        // Legacy car listings
        .route(
            "/listings",
            get(list_car_listings_handler).post(create_car_listing_handler),
        )
        .route("/listings/search", post(search_car_listings_handler))
        .route("/listings/page", post(car_listings_page_handler))
        .route("/listings/by-slug/{slug}", get(get_car_listing_by_slug_handler))
        .route(
            "/listings/{id}",
            get(get_car_listing_handler)
                .patch(update_car_listing_handler)
                .delete(delete_car_listing_handler),
        )
        .route("/listings/{id}/publish", post(publish_car_listing_handler))
        .route("/listings/{id}/sold", post(mark_car_sold_handler))
        .route("/listings/{id}/favorite", post(toggle_car_favorite_handler))
        .route("/listings/{id}/view", post(increment_car_view_handler))
        .route("/listings/{id}/inquiries", post(create_inquiry_handler))
        // Categories
        .route("/categories", get(list_categories_handler))
        .route("/categories/{slug}", get(get_category_handler))
        .route("/categories/{slug}/attributes", get(category_attributes_handler))
        // Universal listings
        .route(
            "/v2/listings",
            get(list_listings_handler).post(create_listing_handler),
        )
        .route("/v2/listings/search", post(search_listings_handler))
        .route("/v2/listings/page", post(listings_page_handler))
        .route("/v2/listings/by-slug/{slug}", get(get_listing_by_slug_handler))
        .route(
            "/v2/listings/{id}",
            get(get_listing_handler)
                .patch(update_listing_handler)
                .delete(delete_listing_handler),
        )
        .route("/v2/listings/{id}/publish", post(publish_listing_handler))
        .route("/v2/listings/{id}/sold", post(mark_sold_handler))
        .route("/v2/listings/{id}/archive", post(archive_listing_handler))
        .route("/v2/listings/{id}/favorite", post(toggle_favorite_handler))
        .route("/v2/listings/{id}/view", post(increment_view_handler))
}

/// The whole application: API, image endpoints and media files.
pub fn create_app(state: AppState) -> Router {
    let media_url = format!("/{}", state.config.media.url.trim_matches('/'));
    info!(media_url = %media_url, "serving media files");

    let api = create_market_router()
        .merge(image_interface::create_image_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            viewer_context_middleware,
        ));

    Router::new()
        .nest("/api/v1", api)
        .nest_service(&media_url, ServeDir::new(&state.config.media.root))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
