//! Built-in catalog of executive job profiles, used when no scraped corpus exists.

use serde_json::{json, Map};

use crate::corpus::{CorpusFile, CorpusMetadata};
use crate::error::PipelineError;
use crate::models::{JobRecord, Salary};

struct Profile {
    title: &'static str,
    slug: &'static str,
    sector: &'static str,
    description: &'static str,
    skills: &'static [&'static str],
    education: &'static [&'static str],
    salary: (i64, i64),
    mbti_fit: &'static [&'static str],
}

const PROFILES: &[Profile] = &[
    Profile {
        title: "Directeur Commercial",
        slug: "directeur-commercial",
        sector: "Business",
        description: "Pilote la stratégie commerciale et manage les équipes de vente",
        skills: &["Leadership", "Stratégie commerciale", "Négociation", "Management"],
        education: &["Bac+5", "École de commerce"],
        salary: (50_000, 80_000),
        mbti_fit: &["ENTJ", "ESTJ", "ENTP"],
    },
    Profile {
        title: "Consultant en Stratégie",
        slug: "consultant-strategie",
        sector: "Conseil",
        description: "Accompagne les directions générales dans leurs choix stratégiques",
        skills: &["Analyse", "Synthèse", "Présentation", "Modélisation financière"],
        education: &["Bac+5", "École de commerce", "École d'ingénieur"],
        salary: (45_000, 70_000),
        mbti_fit: &["INTJ", "ENTJ", "ENTP"],
    },
    Profile {
        title: "Directeur des Ressources Humaines",
        slug: "drh",
        sector: "Ressources Humaines",
        description: "Définit la politique RH et accompagne la transformation de l'organisation",
        skills: &["Droit social", "Recrutement", "Dialogue social", "Gestion des talents"],
        education: &["Bac+5", "Master RH"],
        salary: (50_000, 75_000),
        mbti_fit: &["ENFJ", "ESFJ", "INFJ"],
    },
    Profile {
        title: "Chef de Projet IT",
        slug: "chef-projet-it",
        sector: "Tech",
        description: "Coordonne la conception et le déploiement de projets informatiques",
        skills: &["Gestion de projet", "Agile", "Architecture SI", "Communication"],
        education: &["Bac+5", "École d'ingénieur"],
        salary: (42_000, 65_000),
        mbti_fit: &["ESTJ", "INTJ", "ENTJ"],
    },
    Profile {
        title: "Contrôleur de Gestion",
        slug: "controleur-gestion",
        sector: "Finance",
        description: "Analyse la performance financière et construit les budgets",
        skills: &["Excel", "Comptabilité analytique", "Reporting", "ERP", "Rigueur", "SQL"],
        education: &["Bac+5", "Master CCA"],
        salary: (38_000, 58_000),
        mbti_fit: &["ISTJ", "INTJ", "ESTJ"],
    },
    Profile {
        title: "Data Scientist",
        slug: "data-scientist",
        sector: "Tech",
        description: "Exploite les données pour construire des modèles prédictifs et d'analyse",
        skills: &["Python", "Statistiques", "Machine learning", "SQL", "Visualisation"],
        education: &["Bac+5", "Doctorat"],
        salary: (40_000, 65_000),
        mbti_fit: &["INTP", "INTJ", "ENTP"],
    },
];

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

pub fn sample_records() -> Vec<JobRecord> {
    PROFILES
        .iter()
        .map(|profile| {
            let mut extra = Map::new();
            extra.insert("mbti_fit".to_string(), json!(profile.mbti_fit));
            extra.insert("source".to_string(), json!("APEC"));

            JobRecord {
                title: profile.title.to_string(),
                slug: Some(profile.slug.to_string()),
                sector: Some(profile.sector.to_string()),
                description: Some(profile.description.to_string()),
                missions: None,
                required_skills: to_strings(profile.skills),
                required_education: to_strings(profile.education),
                salary: Some(Salary {
                    min: profile.salary.0,
                    max: profile.salary.1,
                    currency: "EUR".to_string(),
                }),
                url: None,
                extra,
            }
        })
        .collect()
}

pub fn sample_corpus() -> Result<CorpusFile, PipelineError> {
    let metadata = CorpusMetadata {
        last_updated: Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
        sources: vec!["APEC".to_string()],
        language: Some("fr".to_string()),
        country: Some("France".to_string()),
        url: Some("https://www.apec.fr/tous-nos-metiers.html".to_string()),
        ..CorpusMetadata::default()
    };
    CorpusFile::from_records(metadata, &sample_records())
}
