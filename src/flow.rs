//! The USSD menu state machine.
//!
//! Each dialog turn maps `(current state, collected draft, user input)` to a
//! response string and the next state.  Responses follow the USSD gateway
//! convention: a `CON ` prefix keeps the dialog open, `END ` terminates it.
//! The machine mutates only the session handed to it; committing or
//! discarding that session is the caller's job, which is what keeps a failed
//! storage call from advancing the dialog.

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::normalize;
use crate::session::Session;
use crate::store::{IncidentStore, NewIncident, StoreError};

/// Dialog positions.  `Complete` and `Exit` are terminal; the handler purges
/// the session as soon as a turn produces an `END` response, so a session
/// observed in a terminal state is a defect and answered with a reset
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Initial,
    MainMenu,
    CategorySelect,
    LocationInput,
    SeveritySelect,
    DescriptionInput,
    Confirmation,
    ViewReports,
    Complete,
    Exit,
}

pub const CATEGORIES: &[(&str, &str)] = &[
    ("1", "Theft/Burglary"),
    ("2", "Fire Hazard"),
    ("3", "Accident"),
    ("4", "Harassment"),
    ("5", "Infrastructure Damage"),
    ("6", "Public Health Concern"),
];

pub const SEVERITY_LEVELS: &[(&str, &str)] =
    &[("1", "Low"), ("2", "Medium"), ("3", "High"), ("4", "Emergency")];

/// How many recent reports a subscriber can page through.
pub const RECENT_REPORT_LIMIT: usize = 5;

/// Detail views are clipped to fit a single USSD screen.
const DETAIL_MAX_CHARS: usize = 200;

static MAIN_MENU: Lazy<String> = Lazy::new(|| {
    "CON Welcome to Incident Reporting:\n\
     1. Report New Incident\n\
     2. View Previous Reports\n\
     3. Help\n\
     0. Exit"
        .to_string()
});

static CATEGORY_MENU: Lazy<String> = Lazy::new(|| {
    let lines: Vec<String> = CATEGORIES
        .iter()
        .map(|(key, name)| format!("{}. {}", key, name))
        .collect();
    format!("CON Select Incident Category:\n{}", lines.join("\n"))
});

static SEVERITY_MENU: Lazy<String> = Lazy::new(|| {
    let lines: Vec<String> = SEVERITY_LEVELS
        .iter()
        .map(|(key, name)| format!("{}. {}", key, name))
        .collect();
    format!("CON Select Severity Level:\n{}", lines.join("\n"))
});

const LOCATION_PROMPT: &str = "CON Enter location (e.g., Building A, Room 101):";
const DESCRIPTION_PROMPT: &str = "CON Briefly describe the incident:";

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
}

/// Advance one turn.  Returns the full `CON `/`END ` response string.
pub async fn advance(
    session: &mut Session,
    input: &str,
    store: &dyn IncidentStore,
) -> Result<String, StoreError> {
    let input = normalize::normalize_text(input);

    let response = match session.state {
        MenuState::Initial => {
            session.state = MenuState::MainMenu;
            MAIN_MENU.clone()
        }

        MenuState::MainMenu => match input.as_str() {
            "1" => {
                session.state = MenuState::CategorySelect;
                CATEGORY_MENU.clone()
            }
            "2" => {
                let listing = recent_reports(store, &session.phone_number).await?;
                session.state = MenuState::ViewReports;
                listing
            }
            "3" => {
                session.state = MenuState::Initial;
                "END Contact support:\nEmail: support@incident.org\nPhone: +1234567890"
                    .to_string()
            }
            "0" => {
                session.state = MenuState::Exit;
                "END Thank you. Stay safe.".to_string()
            }
            // An empty turn on an open menu re-prompts rather than erroring.
            "" => MAIN_MENU.clone(),
            _ => "END Invalid option. Please dial again.".to_string(),
        },

        MenuState::CategorySelect => match lookup(CATEGORIES, &input) {
            Some(category) => {
                session.incident.category = Some(category.to_string());
                session.state = MenuState::LocationInput;
                LOCATION_PROMPT.to_string()
            }
            None => "END Invalid category. Please start again.".to_string(),
        },

        MenuState::LocationInput => {
            if input.is_empty() {
                LOCATION_PROMPT.to_string()
            } else {
                session.incident.location = Some(input.clone());
                session.state = MenuState::SeveritySelect;
                SEVERITY_MENU.clone()
            }
        }

        MenuState::SeveritySelect => match lookup(SEVERITY_LEVELS, &input) {
            Some(level) => {
                session.incident.severity = Some(level.to_string());
                session.state = MenuState::DescriptionInput;
                DESCRIPTION_PROMPT.to_string()
            }
            None => "END Invalid severity level. Please start again.".to_string(),
        },

        MenuState::DescriptionInput => {
            if input.is_empty() {
                DESCRIPTION_PROMPT.to_string()
            } else {
                session.incident.description = Some(input.clone());
                session.state = MenuState::Confirmation;
                let draft = &session.incident;
                format!(
                    "CON Confirm submission:\n\
                     Category: {}\n\
                     Location: {}\n\
                     Severity: {}\n\
                     Description: {}\n\
                     1. Submit\n\
                     2. Cancel",
                    draft.category.as_deref().unwrap_or("-"),
                    draft.location.as_deref().unwrap_or("-"),
                    draft.severity.as_deref().unwrap_or("-"),
                    draft.description.as_deref().unwrap_or("-"),
                )
            }
        }

        MenuState::Confirmation => {
            if input == "1" {
                let reference = save_incident(session, store).await?;
                session.state = MenuState::Complete;
                format!("END Incident reported successfully!\nReference: {}", reference)
            } else {
                session.state = MenuState::Initial;
                "END Incident reporting cancelled.".to_string()
            }
        }

        MenuState::ViewReports => {
            if input == "0" {
                session.state = MenuState::Initial;
                MAIN_MENU.clone()
            } else {
                report_details(store, &session.phone_number, &input).await?
            }
        }

        MenuState::Complete | MenuState::Exit => {
            "END Session error. Please dial again.".to_string()
        }
    };

    Ok(response)
}

async fn recent_reports(store: &dyn IncidentStore, phone_number: &str) -> Result<String, StoreError> {
    let incidents = store
        .recent_incidents(phone_number, RECENT_REPORT_LIMIT)
        .await?;
    if incidents.is_empty() {
        return Ok("END No previous reports found.".to_string());
    }

    let mut lines = vec!["CON Recent Reports:".to_string()];
    for (n, incident) in incidents.iter().enumerate() {
        lines.push(format!(
            "{}. {} ({})",
            n + 1,
            incident.category,
            incident.created_at.format("%d/%m")
        ));
    }
    lines.push(String::new());
    lines.push("Select a report for details".to_string());
    lines.push("0. Back".to_string());
    Ok(lines.join("\n"))
}

async fn report_details(
    store: &dyn IncidentStore,
    phone_number: &str,
    selection: &str,
) -> Result<String, StoreError> {
    let index = match selection.parse::<i64>() {
        Ok(n) if n >= 1 => (n - 1) as usize,
        Ok(_) => return Ok("END Invalid selection.".to_string()),
        Err(_) => return Ok("END Invalid input.".to_string()),
    };

    let incidents = store
        .recent_incidents(phone_number, RECENT_REPORT_LIMIT)
        .await?;
    match incidents.get(index) {
        Some(incident) => {
            let mut detail = incident.summary();
            if detail.chars().count() > DETAIL_MAX_CHARS {
                detail = detail.chars().take(DETAIL_MAX_CHARS - 3).collect::<String>() + "...";
            }
            Ok(format!("END {}", detail))
        }
        None => Ok("END Report not found.".to_string()),
    }
}

async fn save_incident(session: &Session, store: &dyn IncidentStore) -> Result<String, StoreError> {
    let user_id = store.find_or_create_user(&session.phone_number).await?;
    let reference = generate_reference();
    let draft = &session.incident;
    store
        .create_incident(NewIncident {
            reference: reference.clone(),
            category: draft.category.clone().unwrap_or_default(),
            location: draft.location.clone().unwrap_or_default(),
            severity: draft.severity.clone().unwrap_or_default(),
            description: draft.description.clone().unwrap_or_default(),
            user_id,
        })
        .await?;
    Ok(reference)
}

/// `INC-<YYYYMMDD>-<6 random uppercase alphanumerics>`.  Not globally unique;
/// the collision probability over a day of traffic is accepted as negligible.
pub fn generate_reference() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("INC-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}
