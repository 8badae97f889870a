use kermack_core::model::SirStepper;
use kermack_core::{
    infected_derivative, recovered_derivative, susceptible_derivative, try_run, Integration,
    SimulationSettings, SirParameters, SirState,
};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Simulation request as passed from JavaScript.
///
/// ```js
/// { initial: { susceptible: 999, infected: 1 },
///   params: { beta: 0.002, gamma: 0.1 },
///   settings: { dt: 1, horizon: 5, integration: "compounding" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpidemicConfig {
    pub initial: SirState<f64>,
    pub params: SirParameters<f64>,
    #[serde(default)]
    pub settings: SimulationSettings<f64>,
}

fn to_js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

#[wasm_bindgen]
pub fn derivative_s(s: f64, i: f64, r: f64, beta: f64, alpha: f64, mu: f64, f: f64) -> f64 {
    let params = SirParameters::new(beta)
        .with_alpha(alpha)
        .with_mu(mu)
        .with_immunity_loss(f);
    susceptible_derivative(&SirState::new(s, i).with_recovered(r), &params)
}

#[wasm_bindgen]
pub fn derivative_i(s: f64, i: f64, beta: f64, gamma: f64, mu: f64) -> f64 {
    let params = SirParameters::new(beta).with_gamma(gamma).with_mu(mu);
    infected_derivative(&SirState::new(s, i), &params)
}

#[wasm_bindgen]
pub fn derivative_r(i: f64, r: f64, gamma: f64, mu: f64, f: f64) -> f64 {
    let params = SirParameters::new(0.0)
        .with_gamma(gamma)
        .with_mu(mu)
        .with_immunity_loss(f);
    recovered_derivative(&SirState::new(0.0, i).with_recovered(r), &params)
}

/// Returns `[s, i, r]` after one head-count Euler step.
#[wasm_bindgen]
#[allow(clippy::too_many_arguments)]
pub fn euler_step(
    s: f64,
    i: f64,
    r: f64,
    beta: f64,
    gamma: f64,
    alpha: f64,
    mu: f64,
    f: f64,
    dt: f64,
) -> Vec<f64> {
    let params = SirParameters::new(beta)
        .with_gamma(gamma)
        .with_alpha(alpha)
        .with_mu(mu)
        .with_immunity_loss(f);
    kermack_core::euler_step(&SirState::new(s, i).with_recovered(r), &params, dt)
        .to_array()
        .to_vec()
}

/// Runs a full simulation from an [`EpidemicConfig`] object and returns the
/// serialized trajectory (`times`, `susceptible`, `infected`, `recovered`).
#[wasm_bindgen]
pub fn run_simulation(config: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let config: EpidemicConfig =
        from_value(config).map_err(|e| to_js_error(format!("Invalid config: {}", e)))?;
    let trajectory =
        try_run(config.initial, config.params, &config.settings).map_err(to_js_error)?;

    to_value(&trajectory).map_err(|e| to_js_error(format!("Serialization error: {}", e)))
}

/// Open-ended stepper for hosts that animate the epidemic one step at a time.
#[wasm_bindgen]
pub struct WasmEpidemic {
    initial: SirState<f64>,
    state: SirState<f64>,
    params: SirParameters<f64>,
    t: f64,
    dt: f64,
    integration: Integration,
    stepper: SirStepper<f64>,
}

#[wasm_bindgen]
impl WasmEpidemic {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmEpidemic, JsValue> {
        console_error_panic_hook::set_once();

        let config: EpidemicConfig =
            from_value(config).map_err(|e| to_js_error(format!("Invalid config: {}", e)))?;
        config.settings.validate().map_err(to_js_error)?;
        Ok(Self::from_config(config))
    }

    /// Replaces the current state. It also becomes the starting point for
    /// every later step in `from_initial_state` mode.
    pub fn set_state(&mut self, state: &[f64]) -> Result<(), JsValue> {
        let values = <[f64; 3]>::try_from(state).map_err(|_| {
            to_js_error(format!("Expected 3 compartments, got {}.", state.len()))
        })?;
        self.state = SirState::from(values);
        self.initial = self.state;
        Ok(())
    }

    pub fn get_state(&self) -> Vec<f64> {
        self.state.to_array().to_vec()
    }

    pub fn set_t(&mut self, t: f64) {
        self.t = t;
    }

    pub fn get_t(&self) -> f64 {
        self.t
    }

    pub fn step(&mut self) {
        let basis = match self.integration {
            Integration::Compounding => &self.state,
            Integration::FromInitialState => &self.initial,
        };
        self.state = self.stepper.step(basis, &self.params, self.dt);
        self.t += self.dt;
    }

    /// Takes `count` steps and returns the infected series they produced.
    pub fn advance(&mut self, count: usize) -> Vec<f64> {
        (0..count)
            .map(|_| {
                self.step();
                self.state.infected
            })
            .collect()
    }
}

impl WasmEpidemic {
    pub(crate) fn from_config(config: EpidemicConfig) -> Self {
        Self {
            initial: config.initial,
            state: config.initial,
            params: config.params,
            t: 0.0,
            dt: config.settings.dt,
            integration: config.settings.integration,
            stepper: SirStepper::new(),
        }
    }
}
