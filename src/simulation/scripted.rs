use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::simulation::rules::{EffectActivation, EffectOutcome, SpeciesEffect, StandardRules};

// Collects what a running script asks for; each rayon worker has its own copy.
thread_local! {
    static OUTCOME: RefCell<EffectOutcome> = RefCell::new(EffectOutcome::default());
}

/// A species effect written in Rhai.
///
/// The script body runs on activation with `size`, `chain` and `species` in scope and
/// reports through `score_multiplier(x)`, `add_gold(n)` and `clear_disruptions(n)`.
/// An optional `fn odds(size)` gives activation odds in percent; without it they are 100.
pub struct ScriptedEffect {
    name: String,
    engine: Arc<Engine>,
    ast: AST,
    has_odds: bool,
}

impl ScriptedEffect {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SpeciesEffect for ScriptedEffect {
    fn odds(&self, size: u32) -> u32 {
        if !self.has_odds {
            return 100;
        }
        // Top-level statements read activation constants, so only the function runs here.
        let result = self.engine.call_fn_with_options::<Dynamic>(
            CallFnOptions::new().eval_ast(false),
            &mut Scope::new(),
            &self.ast,
            "odds",
            (size as i64,),
        );
        match result {
            Ok(value) => {
                let odds = value
                    .as_int()
                    .map(|v| v as f64)
                    .or_else(|_| value.as_float())
                    .unwrap_or(0.0);
                odds.clamp(0.0, 100.0) as u32
            }
            Err(e) => {
                warn!(effect = %self.name, size, error = %e, "Effect odds script failed");
                0
            }
        }
    }

    fn activate(&self, activation: &EffectActivation) -> Option<EffectOutcome> {
        OUTCOME.with(|o| *o.borrow_mut() = EffectOutcome::default());

        let mut scope = Scope::new();
        scope.push_constant("size", activation.size as i64);
        scope.push_constant("chain", activation.chain as i64);
        scope.push_constant("species", activation.species.clone());

        if let Err(e) = self.engine.run_ast_with_scope(&mut scope, &self.ast) {
            warn!(
                effect = %self.name,
                species = %activation.species,
                error = %e,
                "Effect script failed, activation cancelled"
            );
            return None;
        }

        Some(OUTCOME.with(|o| *o.borrow()))
    }
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(100_000);
    engine.set_max_string_size(1024);
    engine.set_max_array_size(1000);
    engine.set_max_map_size(500);

    engine.register_fn("score_multiplier", |x: f64| {
        OUTCOME.with(|o| o.borrow_mut().score_multiplier *= x);
    });
    engine.register_fn("score_multiplier", |x: i64| {
        OUTCOME.with(|o| o.borrow_mut().score_multiplier *= x as f64);
    });
    engine.register_fn("add_gold", |n: f64| {
        OUTCOME.with(|o| o.borrow_mut().bonus_gold += n);
    });
    engine.register_fn("add_gold", |n: i64| {
        OUTCOME.with(|o| o.borrow_mut().bonus_gold += n as f64);
    });
    engine.register_fn("clear_disruptions", |n: i64| {
        OUTCOME.with(|o| o.borrow_mut().clear_disruptions += n.max(0) as u32);
    });

    engine
}

/// Compile every `*.rhai` file in `<rule_dir>/effects/`, sorted by file name.
///
/// A missing `effects/` directory yields no effects; a missing rule directory is an error.
pub fn load_effects(rule_dir: &Path) -> Result<Vec<ScriptedEffect>, String> {
    if !rule_dir.exists() {
        return Err(format!(
            "Rule directory not found: {}. Create it with an effects/ subdirectory of .rhai scripts.",
            rule_dir.display()
        ));
    }

    let effect_dir = rule_dir.join("effects");
    if !effect_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<_> = std::fs::read_dir(&effect_dir)
        .map_err(|e| format!("Cannot read {}: {}", effect_dir.display(), e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rhai"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let engine = Arc::new(build_engine());
    let mut effects = Vec::new();
    for entry in entries {
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|n| n.to_str()) else {
            continue;
        };

        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("Cannot read effect {}: {}", path.display(), e))?;
        let ast = engine
            .compile(&source)
            .map_err(|e| format!("Syntax error in {}: {}", path.display(), e))?;
        let has_odds = ast
            .iter_functions()
            .any(|f| f.name == "odds" && f.params.len() == 1);

        debug!(effect = name, has_odds, "Loaded scripted effect");
        effects.push(ScriptedEffect {
            name: name.to_string(),
            engine: Arc::clone(&engine),
            ast,
            has_odds,
        });
    }

    Ok(effects)
}

/// The standard rule table with scripted effects from `rule_dir` layered on top.
pub fn standard_rules_with_scripts(rule_dir: Option<&Path>) -> Result<StandardRules, String> {
    let mut rules = StandardRules::new();
    if let Some(dir) = rule_dir {
        for effect in load_effects(dir)? {
            let name = effect.name().to_string();
            rules = rules.with_effect(name, Arc::new(effect));
        }
    }
    Ok(rules)
}
