//! Prompt resolution: task type -> (system prompt, initial prompt), plus the
//! placeholder substitutions for solution/solver/extractor templates.

use crate::config::Prompts;
use crate::domain::TaskType;
use crate::util::fill_template;

#[derive(Clone, Debug)]
pub struct PromptResolver {
  prompts: Prompts,
}

impl PromptResolver {
  pub fn new(prompts: Prompts) -> Self {
    Self { prompts }
  }

  pub fn default_system(&self) -> &str {
    &self.prompts.default_system_prompt
  }

  pub fn system_prompt(&self, task_type: TaskType) -> &str {
    match task_type {
      TaskType::Learning => &self.prompts.learning_system_prompt,
      TaskType::Guided => &self.prompts.guided_system_prompt,
      TaskType::Exam => &self.prompts.exam_system_prompt,
      TaskType::Tutor => &self.prompts.tutor_system_prompt,
    }
  }

  pub fn initial_prompt(&self, task_type: TaskType) -> &str {
    match task_type {
      TaskType::Learning => &self.prompts.learning_initial_prompt,
      TaskType::Guided => &self.prompts.guided_initial_prompt,
      TaskType::Exam => &self.prompts.exam_initial_prompt,
      TaskType::Tutor => &self.prompts.tutor_initial_prompt,
    }
  }

  /// Hidden message text that hands the reference solution to the model.
  pub fn tutor_solution(&self, solution: &str) -> String {
    fill_template(&self.prompts.tutor_solution_prompt, &[("solution", solution)])
  }

  /// True if `text` is an injected solution message.
  pub fn carries_solution(&self, text: &str) -> bool {
    !self.prompts.solution_marker.is_empty() && text.contains(&self.prompts.solution_marker)
  }

  pub fn solver_system(&self) -> &str {
    &self.prompts.solver_system_prompt
  }

  pub fn solver_task(&self, problem: &str) -> String {
    fill_template(&self.prompts.solver_task_prompt, &[("problem", problem)])
  }

  pub fn extract_answer_system(&self) -> &str {
    &self.prompts.extract_answer_system_prompt
  }

  pub fn extract_answer(&self, problem: &str, solution: &str) -> String {
    fill_template(&self.prompts.extract_answer_prompt, &[("problem", problem), ("solution", solution)])
  }

  /// Recover the task type from a stored system prompt by exact comparison.
  /// Checked in the order Learning, Guided, Exam; `None` when nothing matches
  /// (callers fall back to `Tutor`). Identical templates make this ambiguous;
  /// the first match wins.
  pub fn infer_task_type(&self, system_text: &str) -> Option<TaskType> {
    [TaskType::Learning, TaskType::Guided, TaskType::Exam]
      .into_iter()
      .find(|t| self.system_prompt(*t) == system_text)
  }
}
