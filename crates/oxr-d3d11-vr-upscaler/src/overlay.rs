/// Hotkey control of the upscaler, polled once per presented frame.
///
/// **Toggle key** (default Home): enable or disable upscaling
/// **Cycle key** (default Page Up): step to the next quality tier
use oxr_upscale_core::{Overlay, Settings};
use tracing::info;
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

fn key_down(vk: u32) -> bool {
    vk != 0 && (unsafe { GetAsyncKeyState(vk as i32) } as u16 & 0x8000) != 0
}

#[derive(Debug, Default)]
pub struct HotkeyOverlay {
    prev_toggle: bool,
    prev_cycle: bool,
}

impl HotkeyOverlay {
    pub const fn new() -> Self {
        Self {
            prev_toggle: false,
            prev_cycle: false,
        }
    }
}

impl Overlay for HotkeyOverlay {
    fn on_frame(&mut self, _dt: f32, settings: &Settings) -> Option<Settings> {
        let toggle = key_down(settings.toggle_key);
        let cycle = key_down(settings.cycle_quality_key);
        let toggled = toggle && !self.prev_toggle;
        let cycled = cycle && !self.prev_cycle;
        self.prev_toggle = toggle;
        self.prev_cycle = cycle;

        if !toggled && !cycled {
            return None;
        }
        let mut next = *settings;
        if toggled {
            next.enabled = !next.enabled;
            info!("overlay: enabled={}", next.enabled);
        }
        if cycled {
            next.quality = next.quality.cycle();
            info!("overlay: quality={}", next.quality.name());
        }
        Some(next)
    }

    fn shutdown(&mut self) {
        self.prev_toggle = false;
        self.prev_cycle = false;
    }
}
