use anyhow::{anyhow, Result};
use jetprov_core::TerminalFontProfile;
use jetprov_installer::{SettingKey, SettingValue, SettingsStore, StepPlan};
use tracing::info;

use crate::render::TerminalRenderer;

const USE_SYSTEM_FONT_KEY: &str = "use-system-font";
const FONT_KEY: &str = "font";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TerminalFontOptions {
    pub(crate) font: String,
}

pub(crate) struct FontSession<'a> {
    pub(crate) options: TerminalFontOptions,
    pub(crate) profile: &'a TerminalFontProfile,
    pub(crate) store: &'a mut dyn SettingsStore,
    pub(crate) renderer: TerminalRenderer,
    profile_id: Option<String>,
}

pub(crate) fn font_plan<'s>() -> StepPlan<'static, FontSession<'s>> {
    StepPlan::new()
        .step("check settings schema", FontSession::check_settings_schema)
        .step("resolve default profile", FontSession::resolve_default_profile)
        .step("apply font", FontSession::apply_font)
        .step("verify font", FontSession::verify_font)
}

impl<'a> FontSession<'a> {
    pub(crate) fn new(
        options: TerminalFontOptions,
        profile: &'a TerminalFontProfile,
        store: &'a mut dyn SettingsStore,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            options,
            profile,
            store,
            renderer,
            profile_id: None,
        }
    }

    fn profiles_key(&self, key: &str) -> SettingKey {
        SettingKey::schema(self.profile.profiles_schema.clone(), key)
    }

    fn profile_key(&self, key: &str) -> Result<SettingKey> {
        let id = self
            .profile_id
            .as_deref()
            .ok_or_else(|| anyhow!("default terminal profile has not been resolved"))?;
        Ok(SettingKey::path(format!(
            "{}{id}/{key}",
            self.profile.profile_path_prefix
        )))
    }

    fn desired(&self) -> (SettingValue, SettingValue) {
        (
            SettingValue::Bool(false),
            SettingValue::Str(self.options.font.clone()),
        )
    }

    fn read_font_settings(&mut self) -> Result<(Option<SettingValue>, Option<SettingValue>)> {
        let use_system_font = self.profile_key(USE_SYSTEM_FONT_KEY)?;
        let font = self.profile_key(FONT_KEY)?;
        Ok((self.store.get(&use_system_font)?, self.store.get(&font)?))
    }

    pub(crate) fn check_settings_schema(&mut self) -> Result<()> {
        if self.store.has_schema(&self.profile.profiles_schema)? {
            return Ok(());
        }
        Err(anyhow!(
            "settings schema {} is not installed; is GNOME Terminal present?",
            self.profile.profiles_schema
        ))
    }

    pub(crate) fn resolve_default_profile(&mut self) -> Result<()> {
        let default_key = self.profiles_key("default");
        if let Some(SettingValue::Str(id)) = self.store.get(&default_key)? {
            if !id.trim().is_empty() {
                info!("default terminal profile: {id}");
                self.profile_id = Some(id);
                return Ok(());
            }
        }

        let list_key = self.profiles_key("list");
        let listed = match self.store.get(&list_key)? {
            Some(SettingValue::StrList(ids)) => ids,
            _ => Vec::new(),
        };
        let first = listed
            .into_iter()
            .find(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("no GNOME Terminal profiles exist; open GNOME Terminal once and retry")
            })?;
        self.store
            .set(&default_key, &SettingValue::Str(first.clone()))?;
        info!("no default terminal profile was set; using {first}");
        self.profile_id = Some(first);
        Ok(())
    }

    pub(crate) fn apply_font(&mut self) -> Result<()> {
        let (want_use_system, want_font) = self.desired();
        let (use_system, font) = self.read_font_settings()?;
        if use_system.as_ref() == Some(&want_use_system) && font.as_ref() == Some(&want_font) {
            self.renderer.print_status(
                "skip",
                &format!("terminal font is already {}", self.options.font),
            );
            return Ok(());
        }

        let use_system_key = self.profile_key(USE_SYSTEM_FONT_KEY)?;
        let font_key = self.profile_key(FONT_KEY)?;
        self.store.set(&use_system_key, &want_use_system)?;
        self.store.set(&font_key, &want_font)?;
        Ok(())
    }

    pub(crate) fn verify_font(&mut self) -> Result<()> {
        let (want_use_system, want_font) = self.desired();
        let (use_system, font) = self.read_font_settings()?;
        if use_system.as_ref() != Some(&want_use_system) {
            return Err(anyhow!(
                "{USE_SYSTEM_FONT_KEY} is {use_system:?} after writing; expected false"
            ));
        }
        if font.as_ref() != Some(&want_font) {
            return Err(anyhow!(
                "{FONT_KEY} is {font:?} after writing; expected '{}'",
                self.options.font
            ));
        }
        self.renderer
            .print_status("ok", &format!("terminal font set to {}", self.options.font));
        Ok(())
    }
}
