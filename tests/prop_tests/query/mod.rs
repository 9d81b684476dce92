mod prop_eval;
mod prop_query;
