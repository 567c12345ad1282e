use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{
    auth::Clients,
    chat,
    db::Profile,
    include_res,
    res::escape_html,
    views::{self, Page, ROLE_PATIENCE, Variant},
    AppResult, AppState,
};

#[debug_handler(state = AppState)]
pub async fn index(
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;
    let target = if manager.snapshot().is_authenticated() {
        Page::Dashboard.path()
    } else {
        "/login"
    };

    Ok(Redirect::to(target).into_response())
}

#[debug_handler(state = AppState)]
pub async fn dashboard(
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    render(&clients, &session, Page::Dashboard).await
}

#[debug_handler(state = AppState)]
pub async fn student_corner(
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    render(&clients, &session, Page::StudentCorner).await
}

async fn render(clients: &Clients, session: &Session, page: Page) -> AppResult<Response> {
    let manager = clients.manager(session).await?;
    if !manager.snapshot().is_authenticated() {
        return Ok(Redirect::to(&format!("/login?return_url={}", page.path())).into_response());
    }

    let role = manager.resolved_role(ROLE_PATIENCE).await;
    let variant = views::select(role);
    let state = manager.snapshot();
    let email = state.identity().map(|identity| identity.email.clone()).unwrap_or_default();

    let body = match (page, variant) {
        (Page::StudentCorner, Variant::Faculty) => {
            let mut student_items = String::new();
            for student in chat::contacts_for(manager.backend().as_ref(), role, "").await? {
                student_items += &include_res!(str, "/pages/corner/student_item.html")
                    .replace("{name}", &escape_html(&student.name))
                    .replace("{email}", &escape_html(&student.email))
                    .replace("{department}", &escape_html(&student.department));
            }
            include_res!(str, "/pages/corner/faculty.html")
                .replace("{student_items}", &student_items)
        }
        (Page::StudentCorner, Variant::Student) => {
            profile_fields(include_res!(str, "/pages/corner/student.html"), state.profile.as_ref())
        }
        (_, Variant::Faculty) => {
            profile_fields(include_res!(str, "/pages/dashboard/faculty.html"), state.profile.as_ref())
        }
        (_, Variant::Student) => {
            profile_fields(include_res!(str, "/pages/dashboard/student.html"), state.profile.as_ref())
        }
    };

    Ok(Html(
        body.replace("{title}", page.title(variant))
            .replace("{email}", &escape_html(&email))
    ).into_response())
}

fn profile_fields(template: &str, profile: Option<&Profile>) -> String {
    let field = |value: Option<&String>| escape_html(value.map(String::as_str).unwrap_or("-"));

    template
        .replace("{name}", &escape_html(profile.map(|p| p.name.as_str()).unwrap_or("")))
        .replace("{student_id}", &field(profile.and_then(|p| p.student_id.as_ref())))
        .replace("{department}", &field(profile.and_then(|p| p.department.as_ref())))
        .replace("{batch}", &field(profile.and_then(|p| p.batch.as_ref())))
        .replace("{semester}", &field(profile.and_then(|p| p.semester.as_ref())))
        .replace("{section}", &field(profile.and_then(|p| p.section.as_ref())))
        .replace("{designation}", &field(profile.and_then(|p| p.designation.as_ref())))
        .replace("{phone}", &field(profile.and_then(|p| p.phone.as_ref())))
        .replace("{address}", &field(profile.and_then(|p| p.address.as_ref())))
        .replace("{blood_group}", &field(profile.and_then(|p| p.blood_group.as_ref())))
        .replace("{guardian_name}", &field(profile.and_then(|p| p.guardian_name.as_ref())))
        .replace("{guardian_phone}", &field(profile.and_then(|p| p.guardian_phone.as_ref())))
}
