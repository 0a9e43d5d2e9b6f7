//! Request/response types for the SPID endpoints

use super::idp::IdentityProviderDescriptor;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query parameters of the login chooser
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local path to land on after login
    pub return_to: Option<String>,
}

/// Query parameters of `/spid/dologin`
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DoLoginQuery {
    /// Registry ID of the chosen IdP
    pub provider: Option<String>,
    pub return_to: Option<String>,
}

/// Assertion Consumer Service POST form
#[derive(Debug, Deserialize, ToSchema)]
pub struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Single logout POST form
#[derive(Debug, Deserialize, ToSchema)]
pub struct SloParams {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// IdP chooser page
///
/// Each provider links to `{login_path}/{id}`; `return_to` is carried along
/// as a query parameter when present.
#[must_use]
pub fn generate_provider_chooser(
    providers: &[&IdentityProviderDescriptor],
    login_path: &str,
    return_to: Option<&str>,
) -> String {
    let suffix = return_to
        .map(|rt| format!("?return_to={}", urlencoding::encode(rt)))
        .unwrap_or_default();

    let items: String = providers
        .iter()
        .map(|idp| {
            let logo = idp
                .logo
                .as_deref()
                .map(|src| format!(r#"<img src="{}" alt=""/> "#, html_escape(src)))
                .unwrap_or_default();
            format!(
                r#"        <li><a href="{}/{}{}">{}{}</a></li>
"#,
                html_escape(login_path),
                html_escape(&urlencoding::encode(&idp.id)),
                html_escape(&suffix),
                logo,
                html_escape(&idp.entity_name)
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Entra con SPID</title>
</head>
<body>
    <h1>Entra con SPID</h1>
    <ul>
{items}    </ul>
</body>
</html>"#
    )
}

/// HTML escape for XSS prevention
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idp(id: &str, name: &str) -> IdentityProviderDescriptor {
        IdentityProviderDescriptor {
            id: id.to_string(),
            entity_id: format!("https://{id}.example"),
            entity_name: name.to_string(),
            sso_url: format!("https://{id}.example/sso"),
            slo_url: format!("https://{id}.example/slo"),
            certificate: String::new(),
            logo: None,
        }
    }

    #[test]
    fn test_chooser_lists_providers_in_order() {
        let a = idp("aruba", "Aruba ID");
        let p = idp("poste", "Poste ID");
        let html = generate_provider_chooser(&[&a, &p], "/spid/login", None);

        let aruba = html.find("/spid/login/aruba").unwrap();
        let poste = html.find("/spid/login/poste").unwrap();
        assert!(aruba < poste);
        assert!(html.contains("Poste ID"));
    }

    #[test]
    fn test_chooser_escapes_names_and_carries_return_to() {
        let evil = idp("evil", "<script>alert(1)</script>");
        let html = generate_provider_chooser(&[&evil], "/spid/login", Some("/area?x=1"));

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("return_to=%2Farea%3Fx%3D1"));
    }

    #[test]
    fn test_acs_form_field_names() {
        let form: AcsForm = serde_json::from_value(serde_json::json!({
            "SAMLResponse": "abc",
            "RelayState": "/home",
        }))
        .unwrap();
        assert_eq!(form.saml_response.as_deref(), Some("abc"));
        assert_eq!(form.relay_state.as_deref(), Some("/home"));
    }
}
