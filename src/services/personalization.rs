//! services/personalization.rs
//! Sustitución de `{{token}}` en contenido saliente. Los nombres de token no
//! distinguen mayúsculas; ningún token queda literal en lo que se envía.

use crate::models::deploy_model::Contact;

const FALLBACK_NAME: &str = "there";
const FALLBACK_COMPANY: &str = "your company";

pub fn personalize(template: &str, contact: &Contact) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let token = after_open[..end].trim().to_lowercase();
                out.push_str(&resolve(&token, contact));
                rest = &after_open[end + 2..];
            }
            None => {
                // "{{" sin cierre no es un token.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(token: &str, contact: &Contact) -> String {
    let token = token.replace([' ', '-'], "_");
    match token.as_str() {
        "first_name" | "firstname" | "name" => non_empty(&contact.first_name)
            .unwrap_or(FALLBACK_NAME)
            .to_string(),
        "last_name" | "lastname" => non_empty(&contact.last_name).unwrap_or("").to_string(),
        "full_name" | "fullname" => {
            let parts: Vec<&str> = [non_empty(&contact.first_name), non_empty(&contact.last_name)]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                FALLBACK_NAME.to_string()
            } else {
                parts.join(" ")
            }
        }
        "company" | "company_name" => non_empty(&contact.company)
            .unwrap_or(FALLBACK_COMPANY)
            .to_string(),
        "email" => non_empty(&contact.email).unwrap_or("").to_string(),
        "phone" => non_empty(&contact.phone).unwrap_or("").to_string(),
        "location" | "city" => non_empty(&contact.location).unwrap_or("").to_string(),
        "industry" => non_empty(&contact.industry).unwrap_or("").to_string(),
        "title" | "job_title" | "jobtitle" => non_empty(&contact.job_title).unwrap_or("").to_string(),
        other => {
            log::debug!("(personalize) token desconocido '{}' eliminado", other);
            String::new()
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Contact {
        Contact {
            id: "c1".to_string(),
            email: Some("ana@example.com".to_string()),
            first_name: Some("Ana".to_string()),
            last_name: Some("Pérez".to_string()),
            company: Some("Acme".to_string()),
            job_title: Some("CTO".to_string()),
            ..Contact::default()
        }
    }

    #[test]
    fn tokens_are_case_insensitive() {
        let out = personalize("Hi {{First_Name}}, {{ FULL_NAME }} at {{company}} ({{Title}})", &ana());
        assert_eq!(out, "Hi Ana, Ana Pérez at Acme (CTO)");
    }

    #[test]
    fn missing_data_uses_fallbacks() {
        let out = personalize("Hi {{first_name}} from {{company}}{{location}}", &Contact::default());
        assert_eq!(out, "Hi there from your company");
    }

    #[test]
    fn no_token_survives() {
        let out = personalize("{{unknown}} {{ industry }}{{Phone}}!", &ana());
        assert_eq!(out, " !");
        assert!(!out.contains("{{"));
    }

    #[test]
    fn unclosed_braces_are_left_alone() {
        assert_eq!(personalize("a {{ b", &ana()), "a {{ b");
    }
}
