//! Descriptive answers for sub-symbolic queries.

use std::sync::Arc;

use crate::oracle::TextOracle;

/// Shown when the oracle could not answer.
pub const DESCRIBE_APOLOGY: &str = "Sorry, I couldn't process that query.";

const RESPIRATORY_CONTEXT: &str = "\
Respiratory Disease Context:
- Patient1 presents with persistent cough, shortness of breath, chest pain, wheezing, fever, \
night sweats, weight loss, fatigue, productive cough, hemoptysis, dyspnea, chest tightness, \
tachypnea, cyanosis, hoarseness, orthopnea, and paroxysmal nocturnal dyspnea.
- Test results: chest x-ray shows infiltrates, CT chest shows pulmonary nodules and emphysematous \
changes, spirometry shows obstructive pattern, peak flow shows reduced values, pulse oximetry shows \
hypoxemia, sputum culture shows bacterial growth, tuberculin skin test is positive, bronchoscopy \
shows malignant tissue, arterial blood gas shows respiratory acidosis, allergy panel shows \
environmental allergens, methacholine challenge shows bronchial hyperreactivity, chest x-ray shows \
pleural effusion and pneumothorax, CT pulmonary angiogram shows pulmonary embolus, echocardiogram \
shows left heart failure, D-dimer is elevated.
- Risk factors: tobacco use disorder, occupational dust exposure, family history of atopy, advanced \
age, immunosuppression, recent travel history, allergen exposure, prolonged immobilization, \
cardiovascular comorbidity, previous pulmonary disease.
- Medical history: childhood asthma, previous pneumonia, tuberculosis exposure, malignancy history, \
thromboembolic events.
- Physical findings: decreased breath sounds, rales.";

const DESCRIBE_TEMPLATE: &str = "\
You are a medical assistant specializing in respiratory diseases. Answer questions related to \
respiratory disease diagnosis, symptoms, risk factors, test results, and treatment. Use the \
provided context to ground responses for specific queries about the patient or findings mentioned \
in the context. For general questions, rely on your knowledge of respiratory medicine. If the \
query is unrelated to respiratory diseases, respond with: \"This query is outside my expertise in \
respiratory diseases.\" Use clear, concise language suitable for a medical expert system.

Context:
{context}

User Query: {query}";

/// The prompt sent for `query`.
pub fn description_prompt(query: &str) -> String {
    DESCRIBE_TEMPLATE
        .replace("{context}", RESPIRATORY_CONTEXT)
        .replace("{query}", query)
}

/// Answers general questions from domain knowledge.
pub struct DescriptiveResponder {
    oracle: Arc<dyn TextOracle>,
}

impl DescriptiveResponder {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    pub fn answer(&self, query: &str) -> String {
        match self.oracle.complete(&description_prompt(query)) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!(query, "empty descriptive answer");
                DESCRIBE_APOLOGY.to_string()
            }
            Err(e) => {
                tracing::error!(query, error = %e, "descriptive answer failed");
                DESCRIBE_APOLOGY.to_string()
            }
        }
    }
}

impl std::fmt::Debug for DescriptiveResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptiveResponder").finish_non_exhaustive()
    }
}
