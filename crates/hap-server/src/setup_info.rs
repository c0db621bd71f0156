//! Setup code and SRP verifier management.
//!
//! Accessories with a display show a dynamic setup code that is replaced
//! periodically and for every pairing attempt. Other accessories use the
//! static setup info provisioned by the [`crate::AccessorySetup`] provider.
//! An NFC tag only carries a pairable payload while NFC pairing mode is on.
//!
//! During a pairing attempt the setup info is locked. A transient Pair-Setup
//! may ask to keep it so the following split Pair-Setup can reuse it.

use crate::server::AccessoryServer;
use crate::setup::{SetupCode, SetupInfo, SetupPayload, SetupPayloadFlags};
use crate::timer::{TimerEvent, TimerId};
use crate::transport::TransportKind;
use hap_core::Category;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Current {
    info: Option<SetupInfo>,
    code: Option<SetupCode>,
    lock: bool,
    keep: bool,
}

impl Current {
    fn is_available(&self) -> bool {
        self.info.is_some() || self.code.is_some()
    }
}

/// Setup-info state owned by the server.
#[derive(Debug, Default)]
pub(crate) struct SetupInfoState {
    current: Current,
    refresh_timer: Option<TimerId>,
    nfc_timer: Option<TimerId>,
}

impl SetupInfoState {
    pub(crate) fn refresh_timer(&self) -> Option<TimerId> {
        self.refresh_timer
    }

    pub(crate) fn is_nfc_pairing_mode_active(&self) -> bool {
        self.nfc_timer.is_some()
    }
}

impl AccessoryServer {
    fn setup_payload_flags(&self) -> SetupPayloadFlags {
        SetupPayloadFlags {
            is_paired: self.is_paired(),
            ip_supported: self.has_transport(TransportKind::Ip),
            ble_supported: self.has_transport(TransportKind::Ble),
            wac_supported: false,
            thread_supported: self.has_transport(TransportKind::Thread),
        }
    }

    fn payload_category(&self) -> Category {
        self.primary_accessory
            .as_ref()
            .map_or(Category::OTHER, |a| a.category)
    }

    fn sync_display_and_nfc(&mut self) {
        if self.display.is_none() && self.nfc.is_none() {
            return;
        }

        let flags = self.setup_payload_flags();
        let category = self.payload_category();
        let non_pairable = SetupPayload::new(None, None, flags, category);

        let code = self.setup.current.code.clone();
        let nfc_active = self.setup.is_nfc_pairing_mode_active();
        let mut pairable = None;
        if let Some(code) = &code {
            if self.display.is_some() || (self.nfc.is_some() && nfc_active) {
                match self.accessory_setup.load_setup_id() {
                    Some(setup_id) => {
                        pairable = Some(SetupPayload::new(Some(code), Some(&setup_id), flags, category));
                    }
                    None => warn!("QR code displays / NFC require a setup ID to be provisioned."),
                }
            }
        }

        if let Some(display) = self.display.as_mut() {
            debug!("Updating display setup payload.");
            display.update_setup_payload(pairable.as_ref(), code.as_ref());
        }
        if let Some(nfc) = self.nfc.as_mut() {
            debug!("Updating NFC setup payload.");
            match (&pairable, nfc_active) {
                (Some(payload), true) => nfc.update_setup_payload(payload, true),
                _ => nfc.update_setup_payload(&non_pairable, false),
            }
        }
    }

    fn cancel_refresh_timer(&mut self) {
        if let Some(timer) = self.setup.refresh_timer.take() {
            self.timers.deregister(timer);
        }
    }

    fn clear_setup_info(&mut self) {
        if self.setup.current.is_available() {
            debug!("Invalidating setup info.");
            self.setup.current = Current::default();
            self.cancel_refresh_timer();
        }
    }

    fn prepare_setup_info(&mut self, lock: bool) {
        if self.setup.current.is_available() {
            if lock {
                self.setup.current.lock = true;
                if self.setup.refresh_timer.is_some() {
                    debug!("Locking dynamic setup code for pairing attempt.");
                    self.cancel_refresh_timer();
                }
            } else if self.setup.current.lock {
                debug!("Keeping setup code locked for pairing attempt.");
            }
            return;
        }

        self.setup.current = Current {
            lock,
            ..Current::default()
        };
        if self.display.is_some() {
            debug!("Generating dynamic setup code.");
            self.setup.current.code = Some(SetupCode::generate_random());
            // Verifier is derived on first use.
            if !lock {
                let deadline = self.clock.now() + self.options.setup_code_refresh_interval;
                self.setup.refresh_timer =
                    Some(self.timers.register(deadline, TimerEvent::SetupInfoRefresh));
            }
        } else {
            debug!("Loading static setup code.");
            if self.nfc.is_some() {
                self.setup.current.code = self.accessory_setup.load_setup_code();
            }
            self.setup.current.info = self.accessory_setup.load_setup_info();
        }
        self.sync_display_and_nfc();
    }

    pub(crate) fn handle_setup_info_refresh_timer(&mut self, timer: TimerId) {
        if self.setup.refresh_timer != Some(timer) {
            return;
        }
        self.setup.refresh_timer = None;
        info!("Dynamic setup code expired.");
        self.clear_setup_info();
        if self.display.is_some() {
            self.prepare_setup_info(false);
        }
    }

    /// SRP salt and verifier for the next Pair-Setup M2 or M4.
    ///
    /// With `restore`, only setup info kept from the previous attempt is
    /// acceptable.
    pub(crate) fn setup_info_for_pairing(&mut self, restore: bool) -> Option<SetupInfo> {
        if restore && !self.setup.current.keep {
            warn!("Cannot restore setup code from previous pairing attempt.");
            return None;
        }
        if !self.setup.current.is_available() {
            self.prepare_setup_info(true);
        }
        if !restore && self.setup.current.keep {
            info!("Discarding setup code from previous pairing attempt.");
            self.clear_setup_info();
            self.prepare_setup_info(true);
        }
        if self.setup.current.info.is_none() {
            if let Some(code) = &self.setup.current.code {
                debug!("Generating SRP verifier for dynamic setup code.");
                self.setup.current.info = Some(SetupInfo::from_code(code));
            }
        }
        self.setup.current.info.clone()
    }

    pub(crate) fn setup_info_handle_server_start(&mut self) {
        debug!("Setup info: accessory server start.");
        if self.display.is_some() && !self.is_paired() && self.setup.refresh_timer.is_none() {
            self.prepare_setup_info(false);
        }
    }

    pub(crate) fn setup_info_handle_server_stop(&mut self) {
        debug!("Setup info: accessory server stop.");
        self.cancel_refresh_timer();
        if let Some(timer) = self.setup.nfc_timer.take() {
            self.timers.deregister(timer);
        }
        self.setup = SetupInfoState::default();
        self.sync_display_and_nfc();
    }

    pub(crate) fn setup_info_handle_state_update(&mut self) {
        if !self.is_paired() {
            if self.display.is_some() {
                self.prepare_setup_info(false);
            } else {
                self.sync_display_and_nfc();
            }
        } else if self.nfc.is_some() && self.setup.is_nfc_pairing_mode_active() {
            info!("Pairing complete. Exiting NFC pairing mode.");
            self.exit_nfc_pairing_mode();
        }
    }

    pub(crate) fn setup_info_handle_pairing_start(&mut self) {
        debug!("Pairing attempt started.");
        if self.setup.current.is_available() {
            self.prepare_setup_info(true);
        }
        if let Some(display) = self.display.as_mut() {
            display.handle_start_pairing();
        }
    }

    pub(crate) fn setup_info_handle_pairing_stop(&mut self, keep: bool) {
        debug!("Pairing attempt completed.");
        if keep {
            info!("Keeping setup code for next pairing attempt.");
            self.setup.current.keep = true;
        } else {
            self.clear_setup_info();
            self.sync_display_and_nfc();
        }
        if let Some(display) = self.display.as_mut() {
            display.handle_stop_pairing();
        }
        if self.display.is_some() && !self.is_paired() {
            self.prepare_setup_info(false);
        }
    }

    /// Setup info kept by an aborted attempt must not outlive the restart.
    pub(crate) fn setup_info_forget_kept(&mut self) {
        self.setup.current.keep = false;
    }

    /// Replace the dynamic setup code shown on the display.
    ///
    /// Ignored while the current code does not expire, e.g. during pairing.
    pub fn refresh_setup_payload(&mut self) {
        if self.setup.refresh_timer.is_none() {
            info!("Not refreshing setup payload: Current setup payload does not expire.");
            return;
        }
        info!("Refreshing setup payload.");
        self.clear_setup_info();
        self.prepare_setup_info(false);
    }

    fn complete_exiting_nfc_pairing_mode(&mut self) {
        if !self.setup.current.lock && self.setup.refresh_timer.is_none() {
            self.clear_setup_info();
        }
        self.sync_display_and_nfc();
    }

    pub(crate) fn handle_nfc_pairing_mode_timer(&mut self, timer: TimerId) {
        if self.setup.nfc_timer != Some(timer) {
            return;
        }
        self.setup.nfc_timer = None;
        info!("NFC pairing mode expired.");
        self.complete_exiting_nfc_pairing_mode();
    }

    /// Put a pairable payload on the NFC tag for a limited time.
    ///
    /// Calling again while active extends the window.
    pub fn enter_nfc_pairing_mode(&mut self) {
        if self.is_paired() {
            info!("Not entering NFC pairing mode: Already paired.");
            return;
        }

        let force_sync = match self.setup.nfc_timer.take() {
            Some(timer) => {
                info!("Extending ongoing NFC pairing mode.");
                self.timers.deregister(timer);
                false
            }
            None => {
                info!("Entering NFC pairing mode.");
                true
            }
        };
        let deadline = self.clock.now() + self.options.nfc_pairing_mode_duration;
        self.setup.nfc_timer = Some(self.timers.register(deadline, TimerEvent::NfcPairingMode));

        if !self.setup.current.is_available() {
            self.prepare_setup_info(false);
        } else if force_sync {
            self.sync_display_and_nfc();
        }
    }

    pub fn exit_nfc_pairing_mode(&mut self) {
        match self.setup.nfc_timer.take() {
            Some(timer) => {
                info!("Exiting NFC pairing mode.");
                self.timers.deregister(timer);
                self.complete_exiting_nfc_pairing_mode();
            }
            None => info!("Exit NFC pairing mode ignored: NFC pairing mode is not active."),
        }
    }
}
