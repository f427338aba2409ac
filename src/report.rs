//! The results report: what was entered, how it was interpreted and what was fitted.
use crate::error::Result;
use crate::expr::Function;
use crate::model::EquationModel;
use log::warn;
use serde::Serialize;
use std::io;

const NA: &str = "N/A";

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub fitted_model: Option<String>,
    /// Fitted constants rendered as `name = value` pairs.
    pub fitted_consts: Option<String>,
    pub model: String,
    pub user_input_model: String,
    pub independent_vars: Vec<String>,
    pub user_input_vars: String,
    pub constants: Vec<String>,
    pub user_input_path: String,
}

impl Report {
    /// Collect the report for `model`, fitted or not.
    pub fn new<F: Function>(model: &EquationModel<F>, user_vars: &str, path: &str) -> Self {
        let fitted_consts = model.fitted_constants().map(|c| {
            c.iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join(", ")
        });

        Self {
            fitted_model: model.resulting_function().map(String::from),
            fitted_consts,
            model: model.expression().to_string(),
            user_input_model: model.raw().to_string(),
            independent_vars: model.independent_vars().to_vec(),
            user_input_vars: user_vars.to_string(),
            constants: model.constants().to_vec(),
            user_input_path: path.to_string(),
        }
    }

    /// Write the report as tab separated rows.
    pub fn write_csv<W: io::Write>(&self, wtr: W) -> Result<()> {
        if self.fitted_model.is_none() {
            warn!("did not get a fitted model string");
        }

        let mut w = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(wtr);

        let fitted = self.fitted_model.as_deref().unwrap_or(NA);
        let consts = self.fitted_consts.as_deref().unwrap_or(NA);
        let vars = self.independent_vars.join(", ");
        let constants = self.constants.join(", ");

        w.write_record(["Fitted Model:", fitted])?;
        w.write_record(["Fitted Constants:", consts])?;
        w.write_record(["Interpreted", "", "Raw"])?;
        w.write_record([
            "Model:",
            self.model.as_str(),
            "Entered Model:",
            self.user_input_model.as_str(),
        ])?;
        w.write_record([
            "Independent Var:",
            vars.as_str(),
            "Entered Independent Var:",
            self.user_input_vars.as_str(),
        ])?;
        w.write_record(["Constants:", constants.as_str()])?;
        w.write_record(["", "", "Entered Data:", self.user_input_path.as_str()])?;
        w.flush()?;

        Ok(())
    }
}
