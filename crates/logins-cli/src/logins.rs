use color_eyre::Result;
use logins_core::{storage::LoginsStorage, Login, LoginEntry};
use tracing::instrument;
use uuid::Uuid;

/// Origin of the throwaway health-check login; never a real site.
const HEALTH_ORIGIN: &str = "https://logins-health.invalid";

pub async fn add(storage: &dyn LoginsStorage, entry: LoginEntry, upsert: bool) -> Result<String> {
    let stored = if upsert {
        storage.add_or_update(entry).await?
    } else {
        storage.add(entry).await?
    };
    Ok(stored.guid().to_string())
}

pub async fn show(storage: &dyn LoginsStorage, guid: &str, show_password: bool) -> Result<()> {
    match storage.get(guid).await? {
        Some(login) => println!("{}", format_login(&login, show_password)),
        None => println!("No login with id {guid}."),
    }
    Ok(())
}

pub async fn list(
    storage: &dyn LoginsStorage,
    domain: Option<&str>,
    show_passwords: bool,
) -> Result<()> {
    let logins = match domain {
        Some(domain) => storage.get_by_base_domain(domain).await?,
        None => storage.list().await?,
    };
    if logins.is_empty() {
        println!("No logins stored. Add one with `logins add <origin> -u <user> -p <password>`.");
        return Ok(());
    }
    for login in logins {
        println!("{}", format_login(&login, show_passwords));
    }
    Ok(())
}

pub async fn update(storage: &dyn LoginsStorage, guid: &str, entry: LoginEntry) -> Result<()> {
    let stored = storage.update(guid, entry).await?;
    println!("Updated {}", stored.guid());
    Ok(())
}

pub async fn delete(storage: &dyn LoginsStorage, guid: &str) -> Result<()> {
    if storage.delete(guid).await? {
        println!("Deleted {guid}");
    } else {
        println!("No login with id {guid}.");
    }
    Ok(())
}

/// Round-trip a throwaway login through the adapter, checking that the
/// key resolves and the stored record decrypts to what was written.
#[instrument(skip_all)]
pub async fn health(storage: &dyn LoginsStorage) -> Result<()> {
    storage.warm_up().await?;
    let sample = LoginEntry::for_form(
        HEALTH_ORIGIN,
        HEALTH_ORIGIN,
        format!("health-{}", Uuid::new_v4()),
        "ok",
    );
    let stored = storage.add(sample.clone()).await?;
    let round_trip = storage.get(stored.guid()).await;
    storage.delete(stored.guid()).await?;

    match round_trip? {
        Some(login) if login.to_entry() == sample => Ok(()),
        _ => color_eyre::eyre::bail!("storage round-trip failed"),
    }
}

fn format_login(login: &Login, show_password: bool) -> String {
    let target = match (&login.form_action_origin, &login.http_realm) {
        (Some(action), _) => format!("form {action}"),
        (None, Some(realm)) => format!("realm {realm}"),
        (None, None) => "-".to_string(),
    };
    let username = if login.username.is_empty() {
        "<no username>"
    } else {
        login.username.as_str()
    };
    let password = if show_password {
        login.password.as_str()
    } else {
        "********"
    };
    format!(
        "{} {} [{}] {} / {} (used {}x, last {})",
        login.guid,
        login.origin,
        target,
        username,
        password,
        login.times_used,
        login.time_last_used.format("%Y-%m-%d %H:%M")
    )
}
